use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

use crate::modules::provider::Accuracy;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LocationConfig {
    #[serde(default = "default_geocode_debounce_ms")]
    pub geocode_debounce_ms: u64,
    #[serde(default = "default_max_cache_age_ms")]
    pub max_cache_age_ms: u64,
    #[serde(default = "default_watch_min_interval_ms")]
    pub watch_min_interval_ms: u64,
    #[serde(default = "default_watch_min_displacement_m")]
    pub watch_min_displacement_m: f64,
    #[serde(default = "default_fix_timeout_ms")]
    pub fix_timeout_ms: u64,
    #[serde(default)]
    pub accuracy: Accuracy,
    #[serde(default)]
    pub geocoder: GeocoderConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GeocoderConfig {
    #[serde(default = "default_geocoder_enabled")]
    pub enabled: bool,
    #[serde(default = "default_geocoder_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_geocoder_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_geocode_debounce_ms() -> u64 {
    1000
}

fn default_max_cache_age_ms() -> u64 {
    10_000
}

fn default_watch_min_interval_ms() -> u64 {
    5000
}

fn default_watch_min_displacement_m() -> f64 {
    10.0
}

fn default_fix_timeout_ms() -> u64 {
    15_000
}

fn default_geocoder_enabled() -> bool {
    true
}

fn default_geocoder_base_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_user_agent() -> String {
    format!("courier-companion/{}", env!("CARGO_PKG_VERSION"))
}

fn default_language() -> String {
    "en".to_string()
}

fn default_geocoder_timeout_ms() -> u64 {
    10_000
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            geocode_debounce_ms: default_geocode_debounce_ms(),
            max_cache_age_ms: default_max_cache_age_ms(),
            watch_min_interval_ms: default_watch_min_interval_ms(),
            watch_min_displacement_m: default_watch_min_displacement_m(),
            fix_timeout_ms: default_fix_timeout_ms(),
            accuracy: Accuracy::default(),
            geocoder: GeocoderConfig::default(),
        }
    }
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            enabled: default_geocoder_enabled(),
            base_url: default_geocoder_base_url(),
            user_agent: default_user_agent(),
            language: default_language(),
            timeout_ms: default_geocoder_timeout_ms(),
        }
    }
}

impl LocationConfig {
    pub fn geocode_debounce(&self) -> Duration {
        Duration::from_millis(self.geocode_debounce_ms)
    }

    pub fn max_cache_age(&self) -> Duration {
        Duration::from_millis(self.max_cache_age_ms)
    }

    pub fn watch_min_interval(&self) -> Duration {
        Duration::from_millis(self.watch_min_interval_ms)
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_millis(self.fix_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.geocode_debounce_ms > 0, "geocode_debounce_ms must be positive");
        ensure!(self.watch_min_interval_ms > 0, "watch_min_interval_ms must be positive");
        ensure!(
            self.watch_min_displacement_m.is_finite() && self.watch_min_displacement_m >= 0.0,
            "watch_min_displacement_m must be a non-negative number"
        );
        ensure!(self.fix_timeout_ms > 0, "fix_timeout_ms must be positive");
        ensure!(self.geocoder.timeout_ms > 0, "geocoder.timeout_ms must be positive");
        url::Url::parse(&self.geocoder.base_url)
            .with_context(|| format!("Invalid geocoder base_url: {}", self.geocoder.base_url))?;
        Ok(())
    }

    /// Reads a config file, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: LocationConfig = serde_json::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;

        log::debug!(
            "Loaded location config - debounce: {}ms, cache: {}ms, watch: {}ms/{}m",
            config.geocode_debounce_ms,
            config.max_cache_age_ms,
            config.watch_min_interval_ms,
            config.watch_min_displacement_m
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let config_str = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, config_str)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    let dir = dirs::config_dir().context("Could not find config directory")?;
    Ok(dir.join("courier-companion").join("location.json"))
}

pub fn load_location_config() -> anyhow::Result<LocationConfig> {
    LocationConfig::load_from(&config_path()?)
}

pub fn save_location_config(config: &LocationConfig) -> anyhow::Result<()> {
    config.save_to(&config_path()?)
}

/// Renders a tracking duration as `HH:MM:SS`.
pub fn format_elapsed(elapsed: chrono::Duration) -> String {
    let total = elapsed.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(feature = "shell")]
pub use shell_log::{send_log, LogMessage};

#[cfg(feature = "shell")]
mod shell_log {
    use chrono::Local;
    use serde::{Deserialize, Serialize};
    use tauri::{AppHandle, Emitter};

    #[derive(Serialize, Deserialize)]
    pub struct LogMessage {
        pub level: String,
        pub message: String,
        pub timestamp: String,
    }

    pub fn send_log(app: &AppHandle, level: &str, message: &str) {
        let log_message = LogMessage {
            level: level.to_string(),
            message: message.to_string(),
            timestamp: Local::now().format("%H:%M:%S").to_string(),
        };

        if let Err(e) = app.emit("log_message", &log_message) {
            log::error!("Failed to emit log message: {}", e);
        }

        match level {
            "error" => log::error!("{}", message),
            "warn" => log::warn!("{}", message),
            "debug" => log::debug!("{}", message),
            _ => log::info!("{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().expect("tempdir");
        let config = LocationConfig::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, LocationConfig::default());
        assert_eq!(config.geocode_debounce(), Duration::from_millis(1000));
        assert_eq!(config.max_cache_age(), Duration::from_secs(10));
        assert_eq!(config.watch_min_interval(), Duration::from_secs(5));
        assert_eq!(config.watch_min_displacement_m, 10.0);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("location.json");
        std::fs::write(&path, r#"{"fix_timeout_ms": 3000, "geocoder": {"enabled": false}}"#).unwrap();

        let config = LocationConfig::load_from(&path).unwrap();
        assert_eq!(config.fix_timeout_ms, 3000);
        assert!(!config.geocoder.enabled);
        assert_eq!(config.geocoder.language, "en");
        assert_eq!(config.geocode_debounce_ms, 1000);
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("location.json");
        let config = LocationConfig {
            watch_min_displacement_m: 25.0,
            accuracy: Accuracy::Balanced,
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(LocationConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn rejects_invalid_values() {
        let config = LocationConfig {
            geocode_debounce_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = LocationConfig {
            watch_min_displacement_m: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = LocationConfig::default();
        config.geocoder.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn formats_elapsed_time() {
        assert_eq!(format_elapsed(chrono::Duration::seconds(0)), "00:00:00");
        assert_eq!(format_elapsed(chrono::Duration::milliseconds(6300)), "00:00:06");
        assert_eq!(format_elapsed(chrono::Duration::seconds(3723)), "01:02:03");
        assert_eq!(format_elapsed(chrono::Duration::seconds(-5)), "00:00:00");
    }
}
