use std::time::Duration;

use cyanic_core::request::SizeLimits;
use cyanic_core::settings::{keys, SettingsStore};

/// Default progress poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polls faster than this are clamped; the server renders a preview per poll.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Knobs the executor reads once per job.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    pub previews_enabled: bool,
    pub limits: SizeLimits,
    /// Ask the server to keep its own copy of generated images.
    pub save_images: bool,
    /// Abandon a job whose progress has not moved for this long.
    pub idle_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            previews_enabled: true,
            limits: SizeLimits::default(),
            save_images: false,
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

impl OrchestratorConfig {
    /// Read the executor settings from a store, falling back to defaults
    /// for anything missing or out of range.
    pub fn from_settings(store: &dyn SettingsStore) -> Self {
        let refresh = keys::PREVIEWS_REFRESH_SECONDS.get_or_default(store);
        let poll_interval = match Duration::try_from_secs_f64(refresh) {
            Ok(interval) if refresh > 0.0 => interval.max(MIN_POLL_INTERVAL),
            _ => {
                tracing::warn!(refresh, "Invalid preview refresh interval, using default");
                DEFAULT_POLL_INTERVAL
            }
        };

        let idle_seconds = keys::IDLE_TIMEOUT_SECONDS.get_or_default(store);

        Self {
            poll_interval,
            previews_enabled: keys::PREVIEWS_ENABLED.get_or_default(store),
            limits: SizeLimits {
                min_size: keys::MIN_SIZE.get_or_default(store),
                max_size: keys::MAX_SIZE.get_or_default(store),
                max_size_enabled: keys::MAX_SIZE_ENABLED.get_or_default(store),
            },
            save_images: keys::SAVE_IMAGES.get_or_default(store),
            idle_timeout: (idle_seconds > 0).then(|| Duration::from_secs(idle_seconds)),
        }
    }
}

#[cfg(test)]
mod tests {
    use cyanic_core::settings::JsonSettings;
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_match_settings_defaults() {
        let settings = JsonSettings::with_defaults();
        assert_eq!(OrchestratorConfig::from_settings(&settings), OrchestratorConfig::default());
    }

    #[test]
    fn overrides_are_read() {
        let settings = JsonSettings::from_value(json!({
            "settings_version": 3,
            "previews": {"enabled": false, "refresh_seconds": 0.5},
            "generation": {"max_size": 1536, "max_size_enabled": true, "idle_timeout_seconds": 0},
            "server": {"save_images": true}
        }))
        .unwrap();
        let config = OrchestratorConfig::from_settings(&settings);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert!(!config.previews_enabled);
        assert_eq!(config.limits.max_size, 1536);
        assert!(config.limits.max_size_enabled);
        assert_eq!(config.limits.min_size, 512);
        assert!(config.save_images);
        assert_eq!(config.idle_timeout, None);
    }

    #[test]
    fn huge_refresh_falls_back() {
        let settings = JsonSettings::from_value(json!({
            "settings_version": 3,
            "previews": {"refresh_seconds": 1e30}
        }))
        .unwrap();
        assert_eq!(
            OrchestratorConfig::from_settings(&settings).poll_interval,
            DEFAULT_POLL_INTERVAL
        );
    }

    #[test]
    fn nonsense_refresh_falls_back() {
        let settings = JsonSettings::from_value(json!({
            "settings_version": 3,
            "previews": {"refresh_seconds": -1.0}
        }))
        .unwrap();
        assert_eq!(
            OrchestratorConfig::from_settings(&settings).poll_interval,
            DEFAULT_POLL_INTERVAL
        );

        let tiny = JsonSettings::from_value(json!({
            "settings_version": 3,
            "previews": {"refresh_seconds": 0.001}
        }))
        .unwrap();
        assert_eq!(OrchestratorConfig::from_settings(&tiny).poll_interval, MIN_POLL_INTERVAL);
    }
}
