//! User-adjustable read-aloud settings.
//!
//! Settings are owned by a collaborator (config file, HTTP surface) and shared
//! through a [`SettingsHandle`]. Listeners are told about every update
//! synchronously, in update order, before [`SettingsHandle::update`] returns.

use crate::lock;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

pub const MIN_VOLUME: f32 = 0.0;
pub const MAX_VOLUME: f32 = 2.0;
pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 1.5;

/// Prebuilt synthesis voices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Voice {
    /// Firm
    #[default]
    Kore,
    /// Upbeat
    Puck,
    /// Bright
    Zephyr,
    /// Gravelly
    Algenib,
}

impl Voice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Kore => "Kore",
            Voice::Puck => "Puck",
            Voice::Zephyr => "Zephyr",
            Voice::Algenib => "Algenib",
        }
    }
}

impl std::str::FromStr for Voice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kore" => Ok(Voice::Kore),
            "puck" => Ok(Voice::Puck),
            "zephyr" => Ok(Voice::Zephyr),
            "algenib" => Ok(Voice::Algenib),
            other => Err(format!("unknown voice '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub voice: Voice,
    pub volume: f32,
    pub speed: f32,
    pub read_comments: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            voice: Voice::Kore,
            volume: 1.0,
            speed: 1.0,
            read_comments: true,
        }
    }
}

impl Settings {
    /// Clamp volume and speed into their supported ranges.
    pub fn sanitized(mut self) -> Self {
        self.volume = clamp_or(self.volume, MIN_VOLUME, MAX_VOLUME, 1.0);
        self.speed = clamp_or(self.speed, MIN_SPEED, MAX_SPEED, 1.0);
        self
    }
}

fn clamp_or(v: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if v.is_finite() {
        v.clamp(min, max)
    } else {
        fallback
    }
}

/// Receives settings updates.
///
/// Called synchronously from [`SettingsHandle::update`] with both the previous
/// and the new value. Implementations must not block and must not update the
/// same handle.
pub trait SettingsListener: Send + Sync {
    fn on_settings(&self, previous: &Settings, current: &Settings);
}

struct Shared {
    current: Settings,
    listeners: Vec<Weak<dyn SettingsListener>>,
}

/// Shared, cloneable owner of the current settings
#[derive(Clone)]
pub struct SettingsHandle {
    shared: Arc<Mutex<Shared>>,
}

impl SettingsHandle {
    pub fn new(initial: Settings) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                current: initial.sanitized(),
                listeners: Vec::new(),
            })),
        }
    }

    pub fn current(&self) -> Settings {
        lock(&self.shared).current
    }

    /// Replace the settings, clamped, and notify every live listener.
    /// Returns the value actually stored.
    pub fn update(&self, settings: Settings) -> Settings {
        let settings = settings.sanitized();
        // Held across notification so listeners see updates one at a time
        let mut shared = lock(&self.shared);
        let previous = std::mem::replace(&mut shared.current, settings);
        shared.listeners.retain(|weak| match weak.upgrade() {
            Some(listener) => {
                listener.on_settings(&previous, &settings);
                true
            }
            None => false,
        });
        debug!(target = "settings", listeners = shared.listeners.len(), "Settings replaced");
        settings
    }

    /// Register a listener for as long as it stays alive elsewhere
    pub fn add_listener(&self, listener: Weak<dyn SettingsListener>) {
        lock(&self.shared).listeners.push(listener);
    }
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
