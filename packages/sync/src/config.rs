//! Engine configuration.
//!
//! Every field has a default, so an empty TOML file (or no file at all)
//! yields a working configuration:
//!
//! ```toml
//! fallback_location = { lat = 40.7128, lng = -74.006 }
//! fallback_name = "NYC"
//! initial_zoom = 12.0
//! recent_window_minutes = 180
//! region_label = "Current View"
//! discard_stale_viewports = false
//! anonymous_author_name = "Anonymous User"
//! ```

use std::path::Path;

use safety_map_incident_models::{GeoPoint, RECENT_WINDOW_MINUTES};
use serde::Deserialize;

/// Environment variable naming a TOML config file.
pub const CONFIG_PATH_ENV: &str = "SAFETY_MAP_CONFIG";

/// Environment override for [`SyncConfig::discard_stale_viewports`].
pub const DISCARD_STALE_ENV: &str = "SAFETY_MAP_DISCARD_STALE";

/// Environment override for [`SyncConfig::region_label`].
pub const REGION_LABEL_ENV: &str = "SAFETY_MAP_REGION_LABEL";

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML for [`SyncConfig`].
    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Tunables for the synchronization engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Location used when the device position is unavailable.
    pub fallback_location: GeoPoint,
    /// Human-readable name of the fallback location, used in notices.
    pub fallback_name: String,
    /// Zoom level the map is initialized with.
    pub initial_zoom: f64,
    /// Incidents reported within this many minutes are flagged recent.
    pub recent_window_minutes: i64,
    /// Label written into the region snapshot.
    pub region_label: String,
    /// Drop viewport responses older than the last applied one.
    ///
    /// Off by default: responses are applied in completion order, so a slow
    /// earlier fetch can briefly overwrite a newer viewport.
    pub discard_stale_viewports: bool,
    /// Display name used for messages from users without one.
    pub anonymous_author_name: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fallback_location: GeoPoint::new_unchecked(40.7128, -74.006),
            fallback_name: "NYC".to_string(),
            initial_zoom: 12.0,
            recent_window_minutes: RECENT_WINDOW_MINUTES,
            region_label: "Current View".to_string(),
            discard_stale_viewports: false,
            anonymous_author_name: "Anonymous User".to_string(),
        }
    }
}

impl SyncConfig {
    /// Parses a config from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] if the string is not valid.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::de::from_str(contents)?)
    }

    /// Loads a config from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        log::debug!("Loaded sync config from {}", path.display());
        Ok(config)
    }

    /// Loads the config named by `SAFETY_MAP_CONFIG` (or the defaults when
    /// unset), then applies the individual environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the named file cannot be read or parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies the `SAFETY_MAP_DISCARD_STALE` and `SAFETY_MAP_REGION_LABEL`
    /// overrides, reading each variable through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(DISCARD_STALE_ENV) {
            self.discard_stale_viewports = parse_flag(&value);
        }
        if let Some(label) = lookup(REGION_LABEL_ENV) {
            self.region_label = label;
        }
    }

    /// The recency window as a [`chrono::Duration`].
    #[must_use]
    pub fn recent_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.recent_window_minutes)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
