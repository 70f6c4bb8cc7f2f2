//! Configuration for formguard hosts.
//!
//! Stored as TOML; every section is optional and falls back to defaults.
//!
//! ```toml
//! [rate_limit]
//! max_requests = 5
//! window_ms = 900000
//!
//! [monitor]
//! max_events = 1000
//! retention_days = 7
//! cleanup_interval_secs = 3600
//! rapid_submission_ms = 2000
//! detail_max_len = 200
//! report_path = ""        # empty = log only
//!
//! [consent]
//! path = ""               # empty = platform data directory
//!
//! [logging]
//! level = "warn"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SecurityError;
use crate::monitor::MonitorConfig;
use crate::rate_limit::RateLimitConfig;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<SecurityError> for ConfigError {
    fn from(err: SecurityError) -> Self {
        match err {
            SecurityError::InvalidConfig(message) => ConfigError::ValidationError(message),
            other => ConfigError::ValidationError(other.to_string()),
        }
    }
}

pub const ENV_MAX_REQUESTS: &str = "FORMGUARD_MAX_REQUESTS";
pub const ENV_WINDOW_MS: &str = "FORMGUARD_WINDOW_MS";
pub const ENV_LOG: &str = "FORMGUARD_LOG";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormGuardConfig {
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub consent: ConsentSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window_ms: 900_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub max_events: usize,
    pub retention_days: u64,
    pub cleanup_interval_secs: u64,
    pub rapid_submission_ms: u64,
    pub detail_max_len: usize,
    /// JSON-lines event file (empty = log only)
    pub report_path: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            max_events: 1000,
            retention_days: 7,
            cleanup_interval_secs: 3600,
            rapid_submission_ms: 2000,
            detail_max_len: 200,
            report_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentSettings {
    /// Consent file (empty = platform data directory)
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing` filter directive, e.g. "warn" or "formguard_core=debug"
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl FormGuardConfig {
    /// Load and validate a config file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: FormGuardConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or the default location when `None`.
    ///
    /// A missing default file yields the defaults; an explicit path must exist.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "formguard", "formguard")
            .map(|dirs| dirs.config_dir().join("formguard.toml"))
    }

    /// Override values from `FORMGUARD_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Override values using `lookup` as the environment. Unparsable values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(max) = lookup(ENV_MAX_REQUESTS).and_then(|v| v.trim().parse().ok()) {
            self.rate_limit.max_requests = max;
        }
        if let Some(window) = lookup(ENV_WINDOW_MS).and_then(|v| v.trim().parse().ok()) {
            self.rate_limit.window_ms = window;
        }
        if let Some(level) = lookup(ENV_LOG).filter(|v| !v.trim().is_empty()) {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.to_rate_limit_config().validate()?;
        self.to_monitor_config().validate()?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the config, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn to_rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.rate_limit.max_requests,
            window: Duration::from_millis(self.rate_limit.window_ms),
        }
    }

    pub fn to_monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            max_events: self.monitor.max_events,
            retention: Duration::from_secs(self.monitor.retention_days.saturating_mul(24 * 60 * 60)),
            rapid_submission: Duration::from_millis(self.monitor.rapid_submission_ms),
            detail_max_len: self.monitor.detail_max_len,
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.cleanup_interval_secs.max(1))
    }

    pub fn report_path(&self) -> Option<PathBuf> {
        non_empty_path(&self.monitor.report_path)
    }

    pub fn consent_path(&self) -> Option<PathBuf> {
        non_empty_path(&self.consent.path)
    }
}

fn non_empty_path(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    (!value.is_empty()).then(|| PathBuf::from(value))
}
