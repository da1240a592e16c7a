use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use live_audio::PlayerConfig;
use live_reader_core::dashboard::DashboardConfig;
use live_reader_core::{BufferConfig, GeminiConfig, Settings, SpeechPipelineConfig, Voice};

/// Where live events come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Replay the built-in sample events
    Simulated,
    /// Newline-delimited JSON from a relay process over TCP
    Relay,
}

impl SourceKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" | "sim" => Some(SourceKind::Simulated),
            "relay" | "tcp" => Some(SourceKind::Relay),
            _ => None,
        }
    }
}

/// Which audio output to use
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AudioMode {
    /// External player when one is installed, silent otherwise
    Auto,
    Player,
    Silent,
}

impl AudioMode {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(AudioMode::Auto),
            "player" => Some(AudioMode::Player),
            "silent" | "none" => Some(AudioMode::Silent),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub relay_addr: String,
    pub interval_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: std::env::var("LIVE_SOURCE")
                .ok()
                .and_then(|s| SourceKind::parse(&s))
                .unwrap_or(SourceKind::Simulated),
            relay_addr: std::env::var("LIVE_RELAY_ADDR")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "127.0.0.1:7070".to_string()),
            interval_ms: std::env::var("LIVE_SIM_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(2_500),
        }
    }
}

impl SourceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// High-level configuration for the Live Reader demo
#[derive(Clone, Debug)]
pub struct LiveReaderConfig {
    /// Broadcaster identity passed to the source
    pub identity: String,
    pub source: SourceConfig,
    pub buffer: BufferConfig,
    pub speech: SpeechPipelineConfig,
    pub gemini: GeminiConfig,
    pub audio: AudioMode,
    pub player: PlayerConfig,
    pub dashboard: DashboardConfig,
    /// Initial read-aloud settings
    pub settings: Settings,
}

impl Default for LiveReaderConfig {
    fn default() -> Self {
        // Module defaults already consider env vars
        Self {
            identity: std::env::var("LIVE_IDENTITY")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "demo".to_string()),
            source: SourceConfig::default(),
            buffer: BufferConfig::default(),
            speech: SpeechPipelineConfig::default(),
            gemini: GeminiConfig::default(),
            audio: std::env::var("LIVE_AUDIO")
                .ok()
                .and_then(|s| AudioMode::parse(&s))
                .unwrap_or(AudioMode::Auto),
            player: PlayerConfig::default(),
            dashboard: DashboardConfig::from_env(),
            settings: Settings::default(),
        }
    }
}

impl LiveReaderConfig {
    /// Load configuration from a TOML file (path via LIVE_READER_CONFIG or ./live_reader.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("LIVE_READER_CONFIG").unwrap_or_else(|_| "live_reader.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target = "live_reader", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match Self::from_toml_str(&s, default.clone()) {
                Ok(cfg) => {
                    tracing::info!(target = "live_reader", path = %path, "Loaded TOML config");
                    cfg
                }
                Err(e) => {
                    tracing::warn!(target = "live_reader", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target = "live_reader", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    fn from_toml_str(s: &str, base: Self) -> Result<Self, toml::de::Error> {
        Ok(toml::from_str::<LiveReaderToml>(s)?.overlay(base))
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct LiveReaderToml {
    pub identity: Option<String>,
    pub audio: Option<String>,
    pub source: Option<SourceToml>,
    pub buffer: Option<BufferToml>,
    pub speech: Option<SpeechToml>,
    pub gemini: Option<GeminiToml>,
    pub player: Option<PlayerToml>,
    pub dashboard: Option<DashboardToml>,
    pub settings: Option<SettingsToml>,
}

impl LiveReaderToml {
    fn overlay(self, mut base: LiveReaderConfig) -> LiveReaderConfig {
        if let Some(id) = self.identity.filter(|s| !s.trim().is_empty()) {
            base.identity = id;
        }
        if let Some(a) = self.audio {
            match AudioMode::parse(&a) {
                Some(mode) => base.audio = mode,
                None => tracing::warn!(target = "live_reader", audio = %a, "Unknown audio mode; keeping default"),
            }
        }
        if let Some(s) = self.source {
            s.apply(&mut base.source);
        }
        if let Some(b) = self.buffer {
            b.apply(&mut base.buffer);
        }
        if let Some(s) = self.speech {
            s.apply(&mut base.speech);
        }
        if let Some(g) = self.gemini {
            g.apply(&mut base.gemini);
        }
        if let Some(p) = self.player {
            p.apply(&mut base.player);
        }
        if let Some(d) = self.dashboard {
            d.apply(&mut base.dashboard);
        }
        if let Some(s) = self.settings {
            s.apply(&mut base.settings);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct SourceToml {
    pub kind: Option<String>,
    pub relay_addr: Option<String>,
    pub interval_ms: Option<u64>,
}
impl SourceToml {
    fn apply(self, s: &mut SourceConfig) {
        if let Some(k) = self.kind {
            match SourceKind::parse(&k) {
                Some(kind) => s.kind = kind,
                None => tracing::warn!(target = "live_reader", kind = %k, "Unknown source kind; keeping default"),
            }
        }
        if let Some(x) = self.relay_addr {
            s.relay_addr = x;
        }
        if let Some(x) = self.interval_ms.filter(|v| *v > 0) {
            s.interval_ms = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct BufferToml {
    pub capacity: Option<usize>,
}
impl BufferToml {
    fn apply(self, b: &mut BufferConfig) {
        if let Some(x) = self.capacity.filter(|v| *v > 0) {
            b.capacity = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct SpeechToml {
    pub queue_capacity: Option<usize>,
    pub synthesis_timeout_ms: Option<u64>,
}
impl SpeechToml {
    fn apply(self, s: &mut SpeechPipelineConfig) {
        if let Some(x) = self.queue_capacity.filter(|v| *v > 0) {
            s.queue_capacity = x;
        }
        if let Some(x) = self.synthesis_timeout_ms.filter(|v| *v > 0) {
            s.synthesis_timeout_ms = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct GeminiToml {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_ms: Option<u64>,
}
impl GeminiToml {
    fn apply(self, g: &mut GeminiConfig) {
        if let Some(x) = self.base_url {
            g.base_url = x;
        }
        if let Some(x) = self.model {
            g.model = x;
        }
        if let Some(x) = self.api_key.filter(|k| !k.is_empty()) {
            g.api_key = Some(x);
        }
        if let Some(x) = self.request_timeout_ms {
            g.request_timeout_ms = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct PlayerToml {
    pub player: Option<String>,
    pub temp_dir: Option<PathBuf>,
}
impl PlayerToml {
    fn apply(self, p: &mut PlayerConfig) {
        if let Some(x) = self.player {
            p.player = Some(x);
        }
        if let Some(x) = self.temp_dir {
            p.temp_dir = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct DashboardToml {
    pub enabled: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
}
impl DashboardToml {
    fn apply(self, d: &mut DashboardConfig) {
        if let Some(x) = self.enabled {
            d.enabled = x;
        }
        if let Some(x) = self.host {
            d.host = x;
        }
        if let Some(x) = self.port {
            d.port = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct SettingsToml {
    pub voice: Option<String>,
    pub volume: Option<f32>,
    pub speed: Option<f32>,
    pub read_comments: Option<bool>,
}
impl SettingsToml {
    fn apply(self, s: &mut Settings) {
        if let Some(v) = self.voice {
            match v.parse::<Voice>() {
                Ok(voice) => s.voice = voice,
                Err(e) => tracing::warn!(target = "live_reader", error = %e, "Keeping default voice"),
            }
        }
        if let Some(x) = self.volume {
            s.volume = x;
        }
        if let Some(x) = self.speed {
            s.speed = x;
        }
        if let Some(x) = self.read_comments {
            s.read_comments = x;
        }
        *s = s.sanitized();
    }
}
