//! WAV playback through an external command-line player.
//!
//! Each clip is rendered to a temporary WAV file (volume and speed applied)
//! and handed to the first available player. The child process is killed if
//! the playback future is dropped, which is how the pipeline interrupts audio.
//!
//! Env overrides:
//! - TTS_PLAYER (aplay|paplay|ffplay or a path), optional preference
//! - TTS_TEMP_DIR (where rendered WAV files are written)

use async_trait::async_trait;
use live_reader_core::speech::{AudioClip, AudioSink, PlaybackError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Command;
use tracing::{debug, info, warn};

const KNOWN_PLAYERS: [&str; 3] = ["aplay", "paplay", "ffplay"];

#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Preferred player binary name or path
    pub player: Option<String>,
    pub temp_dir: PathBuf,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            player: std::env::var("TTS_PLAYER").ok().filter(|s| !s.is_empty()),
            temp_dir: std::env::var("TTS_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir()),
        }
    }
}

/// Plays clips with aplay, paplay or ffplay
pub struct PlayerSink {
    bin: PathBuf,
    temp_dir: PathBuf,
    next_file: AtomicU64,
}

impl PlayerSink {
    /// Pick a player. Fails with `Unavailable` when none is installed.
    pub fn new(cfg: PlayerConfig) -> Result<Self, PlaybackError> {
        let bin = select_player(cfg.player.as_deref()).ok_or_else(|| {
            PlaybackError::Unavailable(format!(
                "no audio player found (tried {})",
                KNOWN_PLAYERS.join(", ")
            ))
        })?;
        info!(target = "player", bin = ?bin, "Detected audio player");
        Ok(Self {
            bin,
            temp_dir: cfg.temp_dir,
            next_file: AtomicU64::new(0),
        })
    }

    pub fn from_env() -> Result<Self, PlaybackError> {
        Self::new(PlayerConfig::default())
    }

    pub fn player(&self) -> &Path {
        &self.bin
    }

    fn temp_path(&self) -> PathBuf {
        let n = self.next_file.fetch_add(1, Ordering::Relaxed);
        self.temp_dir
            .join(format!("live-reader-{}-{n}.wav", std::process::id()))
    }
}

/// Removes the rendered file however playback ends
struct TempWav(PathBuf);

impl Drop for TempWav {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            debug!(target = "player", path = ?self.0, error = %e, "Temp WAV not removed");
        }
    }
}

#[async_trait]
impl AudioSink for PlayerSink {
    async fn play(&self, clip: &AudioClip, volume: f32, speed: f32) -> Result<(), PlaybackError> {
        let wav = clip.render_wav(volume, speed)?;
        let path = self.temp_path();
        tokio::fs::write(&path, &wav)
            .await
            .map_err(|e| PlaybackError::Device(format!("write {}: {e}", path.display())))?;
        let file = TempWav(path);

        let mut cmd = Command::new(&self.bin);
        cmd.args(player_args(&self.bin))
            .arg(&file.0)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        debug!(target = "player", bin = ?self.bin, bytes = wav.len(), "Playing clip");
        let status = cmd
            .status()
            .await
            .map_err(|e| PlaybackError::Device(format!("spawn {}: {e}", self.bin.display())))?;

        if status.success() {
            Ok(())
        } else {
            // The pipeline retries and surfaces the final failure itself
            debug!(target = "player", bin = ?self.bin, status = %status, "Player exited with failure");
            Err(PlaybackError::Device(format!(
                "{} exited with {status}",
                self.bin.display()
            )))
        }
    }
}

/// Extra arguments placed before the file path
fn player_args(bin: &Path) -> &'static [&'static str] {
    match bin.file_name().and_then(|s| s.to_str()).unwrap_or("") {
        "ffplay" => &["-autoexit", "-nodisp", "-loglevel", "quiet"],
        "aplay" => &["-q"],
        _ => &[],
    }
}

fn get_from_path(bin: &str) -> Option<PathBuf> {
    // A path-like string is used as given
    if bin.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(bin);
        return if p.is_file() { Some(p) } else { None };
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.is_file())
}

fn select_player(pref: Option<&str>) -> Option<PathBuf> {
    if let Some(p) = pref {
        match get_from_path(p) {
            Some(found) => return Some(found),
            None => warn!(target = "player", player = %p, "Preferred player not found; falling back"),
        }
    }
    KNOWN_PLAYERS.iter().find_map(|name| get_from_path(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ffplay_runs_headless() {
        assert_eq!(
            player_args(Path::new("/usr/bin/ffplay")),
            &["-autoexit", "-nodisp", "-loglevel", "quiet"]
        );
        assert!(player_args(Path::new("paplay")).is_empty());
    }

    #[test]
    fn missing_path_like_player_is_none() {
        let bogus = format!("{}no-such-dir{}no-such-player", std::path::MAIN_SEPARATOR, std::path::MAIN_SEPARATOR);
        assert!(get_from_path(&bogus).is_none());
    }

    fn sink_with(bin: &str) -> Option<PlayerSink> {
        let cfg = PlayerConfig {
            player: Some(bin.into()),
            temp_dir: std::env::temp_dir(),
        };
        PlayerSink::new(cfg).ok().filter(|s| s.player() == Path::new(bin))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_player_is_a_device_error() {
        let Some(sink) = sink_with("/bin/false") else {
            return;
        };
        let clip = AudioClip::pcm16(16_000, 1, vec![0u8; 64]);
        let err = sink.play(&clip, 1.0, 1.0).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Device(ref m) if m.contains("exited with")), "{err}");
        // Rendered file is cleaned up on failure too
        let leftover = std::env::temp_dir().join(format!("live-reader-{}-0.wav", std::process::id()));
        assert!(!leftover.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn undecodable_clip_never_reaches_the_player() {
        let Some(sink) = sink_with("/bin/true") else {
            return;
        };
        let clip = AudioClip::pcm16(u32::MAX, 1, vec![0u8; 64]);
        let err = sink.play(&clip, 1.0, 1.0).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Decode(_)));
    }

    #[test]
    fn unavailable_player_is_reported() {
        let cfg = PlayerConfig {
            player: Some("definitely-not-a-player".into()),
            temp_dir: std::env::temp_dir(),
        };
        // Only meaningful on hosts without any known player
        if KNOWN_PLAYERS.iter().all(|p| get_from_path(p).is_none()) {
            assert!(matches!(PlayerSink::new(cfg), Err(PlaybackError::Unavailable(_))));
        }
    }
}
