// Audio output device abstraction
use super::clip::AudioClip;
use async_trait::async_trait;
use thiserror::Error;

/// Local audio output failure, distinct from synthesis failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("audio decode failed: {0}")]
    Decode(String),

    #[error("audio device unavailable: {0}")]
    Unavailable(String),

    #[error("audio device failed: {0}")]
    Device(String),
}

/// An audio output device.
///
/// `play` resolves when the device reports completion. Dropping the returned
/// future must stop the audio immediately; the pipeline relies on this to
/// cancel a clip mid-playback.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, clip: &AudioClip, volume: f32, speed: f32) -> Result<(), PlaybackError>;
}
