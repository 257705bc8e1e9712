//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `hub.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ServerConfig: bind address, port and the static asset directory.
//!     - StorageConfig: where readings, user files and uploads live.
//!     - QueryConfig: query window and the optional session gate.
//!     - BroadcastConfig: per-subscriber queue depth and send timeout.
//!     - SessionConfig: cookie name and flags.
//!     - LoggingConfig: default filter and per-reading logging.
//!
//! ==============================================================================

use anyhow::{ensure, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "SENSOR_HUB_CONFIG";

/// upper bound for `query.window_days`, about a century
pub const MAX_WINDOW_DAYS: i64 = 36_500;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HubConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub public_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 3000,
            public_dir: PathBuf::from("public"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// record store file, relative to `data_dir`
    pub sensor_file: PathBuf,
    /// per-user credential files, relative to `data_dir`
    pub users_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub bcrypt_cost: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            sensor_file: PathBuf::from("sensordata.json"),
            users_dir: PathBuf::from("users"),
            uploads_dir: PathBuf::from("uploads"),
            bcrypt_cost: 10,
        }
    }
}

impl StorageConfig {
    pub fn sensor_path(&self) -> PathBuf {
        self.data_dir.join(&self.sensor_file)
    }

    pub fn users_path(&self) -> PathBuf {
        self.data_dir.join(&self.users_dir)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueryConfig {
    pub window_days: i64,
    /// answer 401 to sensor queries without a signed-in session
    pub require_session: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            window_days: crate::query::DEFAULT_WINDOW_DAYS,
            require_session: false,
        }
    }
}

impl QueryConfig {
    /// the query window; negative day counts collapse to an empty window
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.window_days.max(0))
            .unwrap_or_else(chrono::Duration::max_value)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BroadcastConfig {
    pub subscriber_buffer: usize,
    pub send_timeout_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 64,
            send_timeout_ms: 2000,
        }
    }
}

impl BroadcastConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    /// set when served over https
    pub secure_cookie: bool,
    /// sessions unused for this long are forgotten
    pub idle_timeout_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "sid".to_string(),
            secure_cookie: false,
            idle_timeout_minutes: 24 * 60,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_minutes.saturating_mul(60))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_sensor_data: true,
        }
    }
}

impl HubConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// reject values the hub can not run with
    pub fn validate(&self) -> anyhow::Result<()> {
        let days = self.query.window_days;
        ensure!(
            (0..=MAX_WINDOW_DAYS).contains(&days),
            "query.window_days must be between 0 and {MAX_WINDOW_DAYS}, got {days}"
        );
        ensure!(
            self.session.idle_timeout_minutes > 0,
            "session.idle_timeout_minutes must be positive"
        );
        Ok(())
    }

    /// Load with default fallback
    ///
    /// `$SENSOR_HUB_CONFIG` wins; a file named there that fails to load is
    /// an error rather than a silent fallback.
    pub fn load_or_default() -> anyhow::Result<Self> {
        if let Ok(explicit) = std::env::var(CONFIG_ENV) {
            let config = Self::load(&explicit)?;
            info!("[CONFIG] Loaded from {}", explicit);
            return Ok(config);
        }

        let paths = [
            PathBuf::from("config").join("hub.toml"),
            PathBuf::from("..").join("config").join("hub.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        info!("[CONFIG] Loaded from {}", path.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        warn!("[CONFIG] Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        warn!("[CONFIG] No config file found - using defaults");
        Ok(Self::default())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.address, self.server.port)
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        info!(
            bind = %self.bind_address(),
            store = %self.storage.sensor_path().display(),
            users = %self.storage.users_path().display(),
            uploads = %self.storage.uploads_dir.display(),
            window_days = self.query.window_days,
            require_session = self.query.require_session,
            subscriber_buffer = self.broadcast.subscriber_buffer,
            "[CONFIG] hub configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: HubConfig = toml::from_str(
            r#"
            [server]
            port = 8080

            [query]
            require_session = true
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.address, "0.0.0.0");
        assert!(config.query.require_session);
        assert_eq!(config.query.window_days, 30);
        assert_eq!(config.broadcast.subscriber_buffer, 64);
        assert_eq!(config.storage.sensor_path(), PathBuf::from("data/sensordata.json"));
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: HubConfig = toml::from_str("").unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:3000");
        assert_eq!(config.session.cookie_name, "sid");
        assert_eq!(config.query.window(), chrono::Duration::days(30));
        assert_eq!(config.session.idle_timeout(), Duration::from_secs(24 * 60 * 60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn out_of_range_window_is_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        for days in ["-1", "9223372036854775807"] {
            let path = dir.path().join("hub.toml");
            std::fs::write(&path, format!("[query]\nwindow_days = {days}\n")).unwrap();
            let err = HubConfig::load(&path).unwrap_err();
            assert!(format!("{err:#}").contains("window_days"), "{err:#}");
        }

        std::fs::write(dir.path().join("ok.toml"), "[query]\nwindow_days = 365\n").unwrap();
        let config = HubConfig::load(dir.path().join("ok.toml")).unwrap();
        assert_eq!(config.query.window(), chrono::Duration::days(365));
    }

    #[test]
    fn window_never_panics_on_extreme_values() {
        let huge = QueryConfig {
            window_days: i64::MAX,
            require_session: false,
        };
        assert_eq!(huge.window(), chrono::Duration::max_value());

        let negative = QueryConfig {
            window_days: -5,
            require_session: false,
        };
        assert_eq!(negative.window(), chrono::Duration::zero());
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = HubConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read config file"));
    }
}
