// Live Reader Core Library
// Bounded live event buffer and ordered speech playback runtime

pub mod buffer;
pub mod dashboard;
pub mod event;
pub mod settings;
pub mod source;
pub mod speech;
pub mod telemetry;

// Export core types
pub use buffer::{BufferConfig, BufferStats, ConnectionState, EventBuffer, EventListener, Subscription};
pub use event::{EventKind, EventPayload, LiveEvent, MalformedEvent, RawEvent};
pub use settings::{Settings, SettingsHandle, SettingsListener, Voice};
pub use source::{ChannelSource, LiveSource, RelaySource, SimulatedSource};
pub use speech::{
    AudioClip, AudioSink, GeminiConfig, GeminiSynthesizer, PlaybackError, PlaybackState,
    PlaybackStatus, SpeechPipeline, SpeechPipelineConfig, SynthesisError, SynthesisRequest,
    Synthesizer,
};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LiveError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dashboard error: {0}")]
    Dashboard(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
pub type Result<T> = std::result::Result<T, LiveError>;

/// Lock a std mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(m: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
