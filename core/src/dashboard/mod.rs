// Dashboard module - read-only HTTP view of the live session
//
// Serves the retained events, an SSE feed of new ones, playback status and
// the user settings.

mod api;
mod event_stream;

pub use api::{router, DashboardServer, DashboardState, StatusReport};
pub use event_stream::{DashboardEvent, EventBroadcaster};

/// Dashboard configuration
///
/// Env overrides: LIVE_DASHBOARD (0/false disables), LIVE_DASHBOARD_HOST,
/// LIVE_DASHBOARD_PORT
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DashboardConfig {
    /// Serve the dashboard at all
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

pub const DEFAULT_DASHBOARD_PORT: u16 = 3030;

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_DASHBOARD_PORT,
        }
    }
}

impl DashboardConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset or unparsable values
    /// keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            enabled: lookup("LIVE_DASHBOARD")
                .map(|v| parse_flag(&v).unwrap_or(defaults.enabled))
                .unwrap_or(defaults.enabled),
            host: lookup("LIVE_DASHBOARD_HOST")
                .filter(|h| !h.trim().is_empty())
                .unwrap_or(defaults.host),
            port: lookup("LIVE_DASHBOARD_PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(defaults.port),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_serve_on_loopback() {
        let cfg = DashboardConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg, DashboardConfig::default());
        assert!(cfg.enabled);
        assert_eq!(cfg.addr(), "127.0.0.1:3030");
    }

    #[test]
    fn env_can_disable_and_move_the_dashboard() {
        let cfg = DashboardConfig::from_lookup(lookup(&[
            ("LIVE_DASHBOARD", "off"),
            ("LIVE_DASHBOARD_HOST", "0.0.0.0"),
            ("LIVE_DASHBOARD_PORT", "8088"),
        ]));
        assert!(!cfg.enabled);
        assert_eq!(cfg.addr(), "0.0.0.0:8088");
    }

    #[test]
    fn unparsable_values_keep_defaults() {
        let cfg = DashboardConfig::from_lookup(lookup(&[
            ("LIVE_DASHBOARD", "maybe"),
            ("LIVE_DASHBOARD_HOST", "  "),
            ("LIVE_DASHBOARD_PORT", "99999"),
        ]));
        assert_eq!(cfg, DashboardConfig::default());
    }
}
