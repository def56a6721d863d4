//! Runtime configuration
//!
//! Defines the schema for `vitals.toml` and loads it from disk, falling back
//! to defaults when no file is present. Every section is optional.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [display]
//! flash_duration_ms = 2000
//! host = "localhost:8080"
//! scheme = "http"
//! transport = "sse"
//! poll_interval_secs = 5
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::VitalsError;
use crate::tracker::{DEFAULT_FLASH_MS, MAX_FLASH_MS};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct VitalsConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// Socket address the ingestion server listens on
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

/// How the display client receives snapshots
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Server-sent events pushed by the server
    #[default]
    Sse,
    /// Periodic fetch of the current record
    Poll,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DisplayConfig {
    #[serde(default = "default_flash_ms")]
    pub flash_duration_ms: u64,
    /// Server host (and port) the client connects to
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub transport: Transport,
    #[serde(default = "default_poll_secs")]
    pub poll_interval_secs: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            flash_duration_ms: default_flash_ms(),
            host: default_host(),
            scheme: default_scheme(),
            transport: Transport::default(),
            poll_interval_secs: default_poll_secs(),
        }
    }
}

impl DisplayConfig {
    /// Reject settings the display cannot honor
    pub fn validate(&self) -> Result<(), VitalsError> {
        if self.flash_duration_ms > MAX_FLASH_MS {
            return Err(VitalsError::Config(format!(
                "flash_duration_ms {} exceeds the maximum of {}",
                self.flash_duration_ms, MAX_FLASH_MS
            )));
        }
        Ok(())
    }

    pub fn flash_duration(&self) -> Duration {
        Duration::from_millis(self.flash_duration_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.host.trim_end_matches('/'))
    }

    /// Push channel endpoint
    pub fn updates_url(&self) -> String {
        format!("{}/updates", self.base_url())
    }

    /// Polling endpoint
    pub fn values_url(&self) -> String {
        format!("{}/values", self.base_url())
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_level() }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_flash_ms() -> u64 {
    DEFAULT_FLASH_MS
}

fn default_host() -> String {
    "localhost:8080".to_string()
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_poll_secs() -> u64 {
    5
}

fn default_level() -> String {
    "info".to_string()
}

impl VitalsConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, VitalsError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            VitalsError::Config(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, VitalsError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| VitalsError::Config(format!("failed to parse config: {}", e)))?;
        config.display.validate()?;
        Ok(config)
    }

    /// Load from the first config file found, or fall back to defaults
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("vitals.toml"),
            PathBuf::from("vitals.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        log::info!("config loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        log::warn!("ignoring {}: {}", path.display(), e);
                    }
                }
            }
        }

        log::warn!("no config file found, using defaults");
        Self::default()
    }
}
