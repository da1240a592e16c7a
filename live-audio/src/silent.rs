// Sink that plays nothing but takes as long as the clip would
use async_trait::async_trait;
use live_reader_core::speech::{AudioClip, AudioSink, PlaybackError};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Stands in for a real device when no player is installed.
///
/// Sleeps for the clip's playback length at the requested speed, so the
/// pipeline keeps the same pacing.
#[derive(Debug, Default)]
pub struct SilentSink {
    played: AtomicU64,
}

impl SilentSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clips played to completion
    pub fn played(&self) -> u64 {
        self.played.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AudioSink for SilentSink {
    async fn play(&self, clip: &AudioClip, _volume: f32, speed: f32) -> Result<(), PlaybackError> {
        let length = clip.duration()?;
        let speed = if speed.is_finite() && speed > 0.0 { speed } else { 1.0 };
        let wait = length.div_f32(speed);
        debug!(target = "player", ms = wait.as_millis() as u64, "Silent playback");
        tokio::time::sleep(wait).await;
        self.played.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
