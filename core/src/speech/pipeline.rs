//! Sequential speech playback pipeline.
//!
//! Comment events reserve a slot in the playback queue at arrival time and
//! synthesize concurrently. A single driver task takes slots from the head
//! in arrival order: it waits on a pending head, skips a failed one, and plays
//! a ready one to completion before moving on, so clips never overlap and
//! never reorder, whatever order the synthesis responses come back in.
//!
//! Env overrides:
//! - TTS_TIMEOUT_MS (synthesis deadline per comment, default 20000)
//! - TTS_QUEUE_CAPACITY (max queued comments, default 32)

use super::clip::AudioClip;
use super::queue::{PlaybackQueue, PreparedClip, Reservation, SlotState};
use super::sink::{AudioSink, PlaybackError};
use super::synth::{SynthesisError, SynthesisRequest, Synthesizer};
use crate::buffer::{ConnectionState, EventBuffer, EventListener, Subscription};
use crate::event::{EventKind, LiveEvent};
use crate::lock;
use crate::settings::{Settings, SettingsHandle, SettingsListener};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// At most one immediate retry per clip on device failure
const MAX_PLAY_ATTEMPTS: usize = 2;

#[derive(Clone, Debug)]
pub struct SpeechPipelineConfig {
    pub queue_capacity: usize,
    pub synthesis_timeout_ms: u64,
}

impl Default for SpeechPipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: std::env::var("TTS_QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(32),
            synthesis_timeout_ms: std::env::var("TTS_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(20_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Playing,
    Halted,
}

/// Read-only view of the pipeline for collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    /// Sequence of the comment currently being played
    pub current: Option<u64>,
    pub queued: usize,
    pub queue_capacity: usize,
    pub played: u64,
    pub skipped: u64,
    pub synthesis_failures: u64,
    pub device_failures: u64,
    pub dropped_overflow: u64,
    pub last_warning: Option<String>,
}

/// Text spoken for a comment
pub fn utterance(nickname: &str, comment: &str) -> String {
    format!("{nickname} said, \"{comment}\"")
}

/// Reasons the queue may be closed. It accepts comments only when none apply.
struct Gate {
    reading: bool,
    connected: bool,
    held: bool,
    stopped: bool,
}

impl Gate {
    fn open(&self) -> bool {
        self.reading && self.connected && !self.held && !self.stopped
    }
}

struct Inner {
    queue: PlaybackQueue,
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    settings: SettingsHandle,
    gate: Mutex<Gate>,
    synthesis_timeout: Duration,
    runtime: Handle,

    current: Mutex<Option<u64>>,
    last_warning: Mutex<Option<String>>,

    played: AtomicU64,
    skipped: AtomicU64,
    synthesis_failures: AtomicU64,
    device_failures: AtomicU64,
    dropped_overflow: AtomicU64,
}

pub struct SpeechPipeline {
    inner: Arc<Inner>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechPipeline {
    /// Build the pipeline and spawn its playback driver on the current runtime.
    /// The pipeline follows `settings` from then on: switching read-aloud off
    /// halts it and switching it back on resumes it before the update returns.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: SpeechPipelineConfig,
        synthesizer: Arc<dyn Synthesizer>,
        sink: Arc<dyn AudioSink>,
        settings: SettingsHandle,
    ) -> Arc<Self> {
        let reading = settings.current().read_comments;
        let queue = PlaybackQueue::new(config.queue_capacity);
        if !reading {
            queue.close();
        }
        let inner = Arc::new(Inner {
            queue,
            synthesizer,
            sink,
            settings: settings.clone(),
            gate: Mutex::new(Gate {
                reading,
                connected: true,
                held: false,
                stopped: false,
            }),
            synthesis_timeout: Duration::from_millis(config.synthesis_timeout_ms),
            runtime: Handle::current(),
            current: Mutex::new(None),
            last_warning: Mutex::new(None),
            played: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            synthesis_failures: AtomicU64::new(0),
            device_failures: AtomicU64::new(0),
            dropped_overflow: AtomicU64::new(0),
        });

        let listener: Weak<dyn SettingsListener> = Arc::downgrade(&inner) as Weak<dyn SettingsListener>;
        settings.add_listener(listener);
        let driver = tokio::spawn(run_driver(Arc::clone(&inner)));

        info!(
            target = "speech",
            queue_capacity = config.queue_capacity,
            synthesis_timeout_ms = config.synthesis_timeout_ms,
            "Speech pipeline started"
        );

        Arc::new(Self {
            inner,
            driver: Mutex::new(Some(driver)),
        })
    }

    /// Subscribe this pipeline to a buffer's new events and connection state
    pub fn attach(self: &Arc<Self>, buffer: &EventBuffer) -> Subscription {
        let listener: Arc<dyn EventListener> = Arc::clone(self) as Arc<dyn EventListener>;
        buffer.subscribe(listener)
    }

    /// Handle one newly appended event.
    ///
    /// Non-comments and comments arriving while read-aloud is off or the
    /// pipeline is halted are ignored. Otherwise a slot is reserved now and
    /// synthesis runs in the background.
    pub fn on_new_event(&self, event: &LiveEvent) {
        if event.kind() != EventKind::Comment {
            return;
        }
        let Some(comment) = event.comment() else {
            return;
        };

        let sequence = event.sequence;
        let settings = self.inner.settings.current();
        if !settings.read_comments {
            debug!(target = "speech", sequence, "Read-aloud off; comment ignored");
            return;
        }

        match self.inner.queue.reserve(sequence) {
            Reservation::Reserved => {}
            Reservation::Closed => {
                debug!(target = "speech", sequence, "Pipeline halted; comment ignored");
                return;
            }
            Reservation::Full => {
                self.inner.dropped_overflow.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target = "speech",
                    sequence,
                    capacity = self.inner.queue.capacity(),
                    "Playback queue full; comment dropped"
                );
                return;
            }
        }

        let request = SynthesisRequest {
            text: utterance(&event.nickname, comment),
            voice: settings.voice,
            speed: settings.speed,
        };
        let volume = settings.volume;
        debug!(target = "speech", sequence, voice = settings.voice.as_str(), "Slot reserved; synthesizing");

        let inner = Arc::clone(&self.inner);
        let task = self.inner.runtime.spawn(async move {
            let result = synthesize_bounded(&inner, &request)
                .await
                .map(|clip| PreparedClip {
                    clip,
                    volume,
                    speed: request.speed,
                });
            if let Err(e) = &result {
                debug!(target = "speech", sequence, error = %e, "Synthesis failed");
            }
            inner.queue.fill(sequence, result);
        });
        self.inner.queue.attach(sequence, task.abort_handle());
    }

    /// Stop the current clip and discard everything queued.
    /// Nothing new is accepted until [`SpeechPipeline::resume`].
    pub fn halt(&self, reason: &str) {
        self.inner.set_gate(reason, |g| g.held = true);
    }

    /// Undo [`SpeechPipeline::halt`]. The pipeline stays halted while
    /// read-aloud is off or the live source is disconnected.
    pub fn resume(&self) {
        self.inner.set_gate("resume requested", |g| g.held = false);
    }

    pub fn status(&self) -> PlaybackStatus {
        let inner = &self.inner;
        let current = *lock(&inner.current);
        let state = if !inner.queue.is_open() {
            PlaybackState::Halted
        } else if current.is_some() {
            PlaybackState::Playing
        } else {
            PlaybackState::Idle
        };
        PlaybackStatus {
            state,
            current,
            queued: inner.queue.len(),
            queue_capacity: inner.queue.capacity(),
            played: inner.played.load(Ordering::Relaxed),
            skipped: inner.skipped.load(Ordering::Relaxed),
            synthesis_failures: inner.synthesis_failures.load(Ordering::Relaxed),
            device_failures: inner.device_failures.load(Ordering::Relaxed),
            dropped_overflow: inner.dropped_overflow.load(Ordering::Relaxed),
            last_warning: lock(&inner.last_warning).clone(),
        }
    }

    /// Halt and stop the driver for good
    pub fn shutdown(&self) {
        self.inner.set_gate("pipeline shut down", |g| g.stopped = true);
        if let Some(handle) = lock(&self.driver).take() {
            handle.abort();
        }
    }
}

impl EventListener for SpeechPipeline {
    fn on_event(&self, event: &LiveEvent) {
        self.on_new_event(event);
    }

    fn on_state(&self, state: ConnectionState) {
        match state {
            ConnectionState::Disconnected => {
                self.inner.set_gate("live source disconnected", |g| g.connected = false)
            }
            ConnectionState::Connected => {
                self.inner.set_gate("live source connected", |g| g.connected = true)
            }
            ConnectionState::Idle | ConnectionState::Connecting => {}
        }
    }
}

impl Drop for SpeechPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    /// Apply `change` and open or close the queue to match.
    /// Runs under the gate lock so concurrent changes cannot interleave.
    fn set_gate(&self, reason: &str, change: impl FnOnce(&mut Gate)) {
        let mut gate = lock(&self.gate);
        let was_open = gate.open();
        change(&mut gate);
        match (was_open, gate.open()) {
            (true, false) => {
                let discarded = self.queue.close();
                info!(target = "speech", reason = %reason, discarded, "Playback halted");
            }
            (false, true) => {
                if self.queue.reopen() {
                    info!(target = "speech", reason = %reason, "Playback resumed");
                }
            }
            _ => {}
        }
    }

    fn surface_warning(&self, sequence: u64, message: String) {
        warn!(target = "speech", sequence, "{}", message);
        *lock(&self.last_warning) = Some(message);
    }
}

impl SettingsListener for Inner {
    fn on_settings(&self, previous: &Settings, current: &Settings) {
        if previous.read_comments != current.read_comments {
            let reading = current.read_comments;
            let reason = if reading { "read-aloud enabled" } else { "read-aloud disabled" };
            self.set_gate(reason, |g| g.reading = reading);
        }
    }
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn synthesize_bounded(
    inner: &Inner,
    request: &SynthesisRequest,
) -> Result<AudioClip, SynthesisError> {
    match timeout(inner.synthesis_timeout, inner.synthesizer.synthesize(request)).await {
        Ok(result) => result,
        Err(_) => Err(SynthesisError::Timeout(
            inner.synthesis_timeout.as_millis() as u64,
        )),
    }
}

/// The only place audio is started. One clip at a time, head first.
async fn run_driver(inner: Arc<Inner>) {
    loop {
        let settled = inner.queue.next_settled().await;
        let sequence = settled.sequence;
        match settled.state {
            SlotState::Ready(prepared) => {
                play_slot(&inner, sequence, settled.generation, prepared).await;
            }
            SlotState::Failed(e) => {
                inner.synthesis_failures.fetch_add(1, Ordering::Relaxed);
                inner.skipped.fetch_add(1, Ordering::Relaxed);
                debug!(target = "speech", sequence, error = %e, "Skipping failed slot");
            }
            // next_settled never yields a pending slot
            SlotState::Pending => {}
        }
    }
}

/// Run one `sink.play` call in its own task so a panicking device cannot take
/// the driver down with it. Resolves to `None` if the queue was cleared first.
async fn play_isolated(
    inner: &Inner,
    generation: u64,
    clip: &Arc<PreparedClip>,
) -> Option<Result<(), PlaybackError>> {
    let sink = Arc::clone(&inner.sink);
    let clip = Arc::clone(clip);
    let mut task = AbortOnDrop(tokio::spawn(async move {
        sink.play(&clip.clip, clip.volume, clip.speed).await
    }));

    tokio::select! {
        biased;
        _ = inner.queue.cleared_since(generation) => {
            task.0.abort();
            // Wait for the device to be released before the next clip starts
            let _ = (&mut task.0).await;
            None
        }
        joined = &mut task.0 => Some(joined.unwrap_or_else(|e| {
            Err(PlaybackError::Device(format!("playback task failed: {e}")))
        })),
    }
}

async fn play_slot(inner: &Inner, sequence: u64, generation: u64, prepared: PreparedClip) {
    *lock(&inner.current) = Some(sequence);
    let prepared = Arc::new(prepared);

    for attempt in 1..=MAX_PLAY_ATTEMPTS {
        match play_isolated(inner, generation, &prepared).await {
            None => {
                debug!(target = "speech", sequence, "Playback interrupted");
                break;
            }
            Some(Ok(())) => {
                inner.played.fetch_add(1, Ordering::Relaxed);
                debug!(target = "speech", sequence, "Playback finished");
                break;
            }
            // Undecodable audio fails the same way every time
            Some(Err(e)) if attempt < MAX_PLAY_ATTEMPTS && !matches!(e, PlaybackError::Decode(_)) => {
                debug!(target = "speech", sequence, error = %e, "Playback failed; retrying once");
            }
            Some(Err(e)) => {
                inner.device_failures.fetch_add(1, Ordering::Relaxed);
                inner.skipped.fetch_add(1, Ordering::Relaxed);
                inner.surface_warning(sequence, format!("audio output failed for comment #{sequence}: {e}"));
                break;
            }
        }
    }

    *lock(&inner.current) = None;
}
