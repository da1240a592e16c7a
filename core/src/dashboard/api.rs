// Dashboard HTTP API server
//
// REST endpoints over the event buffer and playback pipeline, plus an SSE feed

use crate::buffer::{BufferStats, ConnectionState, EventBuffer, Subscription};
use crate::dashboard::event_stream::EventBroadcaster;
use crate::dashboard::DashboardConfig;
use crate::event::LiveEvent;
use crate::settings::{Settings, SettingsHandle};
use crate::speech::{PlaybackStatus, SpeechPipeline};
use crate::{LiveError, Result};
use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Shared handler state
#[derive(Clone)]
pub struct DashboardState {
    pub buffer: Arc<EventBuffer>,
    pub pipeline: Option<Arc<SpeechPipeline>>,
    pub settings: SettingsHandle,
    pub broadcaster: EventBroadcaster,
}

/// Body of `GET /api/status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub connection: ConnectionState,
    pub buffer: BufferStats,
    pub playback: Option<PlaybackStatus>,
    pub stream_clients: usize,
}

/// Build the dashboard routes over `state`
pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/api/events", get(events_handler))
        .route("/api/events/stream", get(event_stream_handler))
        .route("/api/status", get(status_handler))
        .route("/api/settings", get(get_settings_handler).put(put_settings_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Dashboard HTTP server
pub struct DashboardServer {
    config: DashboardConfig,
    state: DashboardState,
    feed: Subscription,
}

impl DashboardServer {
    /// Wire a broadcaster into `buffer` and prepare the server state
    pub fn new(
        config: DashboardConfig,
        buffer: Arc<EventBuffer>,
        settings: SettingsHandle,
    ) -> Self {
        let broadcaster = EventBroadcaster::default();
        let feed = broadcaster.attach(&buffer);
        Self {
            config,
            state: DashboardState {
                buffer,
                pipeline: None,
                settings,
                broadcaster,
            },
            feed,
        }
    }

    pub fn with_pipeline(mut self, pipeline: Arc<SpeechPipeline>) -> Self {
        self.state.pipeline = Some(pipeline);
        self
    }

    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    /// Bind and serve until the task is dropped or the listener fails
    pub async fn serve(self) -> Result<()> {
        let addr = self.config.addr();
        info!(target: "dashboard", addr = %addr, "Starting dashboard server");

        let app = router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| LiveError::Dashboard(format!("bind {addr}: {e}")))?;
        info!(target: "dashboard", url = %format!("http://{}", addr), "Dashboard server ready");

        let served = axum::serve(listener, app)
            .await
            .map_err(|e| LiveError::Dashboard(e.to_string()));
        self.feed.unsubscribe();
        served
    }
}

/// Retained events, oldest first
async fn events_handler(State(state): State<DashboardState>) -> Json<Vec<LiveEvent>> {
    Json(state.buffer.snapshot())
}

/// SSE endpoint for newly appended events and connection changes
async fn event_stream_handler(
    State(state): State<DashboardState>,
) -> Sse<impl tokio_stream::Stream<Item = std::result::Result<Event, Infallible>>> {
    info!(target: "dashboard", "New SSE client connected");

    let rx = state.broadcaster.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().event(event.name()).data(json))),
            Err(e) => {
                warn!(target: "dashboard", error = %e, "Failed to serialize event");
                None
            }
        },
        Err(e) => {
            warn!(target: "dashboard", error = %e, "SSE client lagged");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn status_handler(State(state): State<DashboardState>) -> Json<StatusReport> {
    Json(StatusReport {
        connection: state.buffer.state(),
        buffer: state.buffer.stats(),
        playback: state.pipeline.as_ref().map(|p| p.status()),
        stream_clients: state.broadcaster.subscriber_count(),
    })
}

async fn get_settings_handler(State(state): State<DashboardState>) -> Json<Settings> {
    Json(state.settings.current())
}

/// Replace the settings; out-of-range values are clamped
async fn put_settings_handler(
    State(state): State<DashboardState>,
    Json(settings): Json<Settings>,
) -> Json<Settings> {
    let settings = state.settings.update(settings);
    info!(
        target: "dashboard",
        voice = settings.voice.as_str(),
        volume = settings.volume,
        speed = settings.speed,
        read_comments = settings.read_comments,
        "Settings updated"
    );
    Json(settings)
}
