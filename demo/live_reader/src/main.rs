mod config;
use config::{AudioMode, LiveReaderConfig, SourceKind};
use live_audio::{PlayerSink, SilentSink};
use live_reader_core::dashboard::DashboardServer;
use live_reader_core::{
    telemetry, AudioSink, EventBuffer, GeminiSynthesizer, LiveSource, RelaySource, SettingsHandle,
    SimulatedSource, SpeechPipeline,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    telemetry::init_logging("info")?;

    info!(
        target = "live_reader",
        "Starting Live Reader: live source → event buffer → speech → audio"
    );

    // Defaults + env + optional TOML overlay
    let cfg = LiveReaderConfig::load();

    let settings = SettingsHandle::new(cfg.settings);

    let buffer = Arc::new(EventBuffer::new(cfg.buffer.clone()));

    let synthesizer = Arc::new(GeminiSynthesizer::new(cfg.gemini.clone())?);
    let sink = build_sink(&cfg)?;
    let pipeline = SpeechPipeline::start(cfg.speech.clone(), synthesizer, sink, settings.clone());
    let speech_sub = pipeline.attach(&buffer);

    // Dashboard subscribes before connecting so it sees every event
    let dashboard = cfg.dashboard.enabled.then(|| {
        let server = DashboardServer::new(cfg.dashboard.clone(), Arc::clone(&buffer), settings.clone())
            .with_pipeline(Arc::clone(&pipeline));
        tokio::spawn(async move {
            if let Err(e) = server.serve().await {
                error!(target = "live_reader", error = %e, "Dashboard server stopped");
            }
        })
    });

    let source: Box<dyn LiveSource> = match cfg.source.kind {
        SourceKind::Simulated => Box::new(SimulatedSource::new(cfg.source.interval())),
        SourceKind::Relay => Box::new(RelaySource::new(cfg.source.relay_addr.clone())),
    };
    info!(
        target = "live_reader",
        identity = %cfg.identity,
        source = ?cfg.source.kind,
        "Connecting"
    );
    // Connection failures are reported but not retried
    if let Err(e) = buffer.connect(source.as_ref(), &cfg.identity).await {
        error!(target = "live_reader", error = %e, "Could not connect to live source");
    }

    signal::ctrl_c().await?;
    info!(target = "live_reader", "Shutting down...");

    buffer.stop();
    speech_sub.unsubscribe();
    pipeline.shutdown();
    if let Some(handle) = dashboard {
        handle.abort();
    }
    Ok(())
}

fn build_sink(cfg: &LiveReaderConfig) -> Result<Arc<dyn AudioSink>, Box<dyn std::error::Error + Send + Sync>> {
    match cfg.audio {
        AudioMode::Silent => Ok(Arc::new(SilentSink::new())),
        AudioMode::Player => Ok(Arc::new(PlayerSink::new(cfg.player.clone())?)),
        AudioMode::Auto => match PlayerSink::new(cfg.player.clone()) {
            Ok(player) => Ok(Arc::new(player)),
            Err(e) => {
                warn!(target = "live_reader", error = %e, "No audio player; using silent output");
                Ok(Arc::new(SilentSink::new()))
            }
        },
    }
}
