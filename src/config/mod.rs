//! Configuration Module
//!
//! Provides TOML-based configuration for the VibeMQ core with support for:
//! - Logging level
//! - Per-client QoS queue limits
//! - Retained message handling
//! - Retained message persistence
//! - Environment variable overrides (VIBEMQ__* prefix)

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use persistence::PersistenceConfig;

use crate::retain::RetainMode;
use crate::session::QosPublishQueue;

mod persistence;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(format!("substitution pattern: {}", e)))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .to_string())
}


/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Per-client limits
    pub limits: LimitsConfig,
    /// Retained message handling
    pub retain: RetainConfig,
    /// Retained message persistence
    pub persistence: PersistenceConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Per-client limits configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Bytes of QoS 1/2 publishes a client may have in flight (0 = unbounded)
    pub max_qos_bytes_pending: usize,
    /// QoS 1/2 publishes a client may have in flight
    #[serde(default = "default_max_qos_msg_pending")]
    pub max_qos_msg_pending_per_client: usize,
}

fn default_max_qos_msg_pending() -> usize {
    65535
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_qos_bytes_pending: 0,
            max_qos_msg_pending_per_client: default_max_qos_msg_pending(),
        }
    }
}

impl LimitsConfig {
    /// Whether `queue` may take another publish of `footprint` bytes
    pub fn qos_queue_has_room(&self, queue: &QosPublishQueue, footprint: usize) -> bool {
        if queue.size() >= self.max_qos_msg_pending_per_client {
            return false;
        }
        self.max_qos_bytes_pending == 0
            || queue.byte_size() + footprint <= self.max_qos_bytes_pending
    }
}

/// Retained message configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetainConfig {
    /// What to do with publishes that have the retain flag
    pub mode: RetainMode,
    /// Drop retained messages older than this (e.g., "30d")
    #[serde(default, with = "humantime_serde")]
    pub expire_after: Option<Duration>,
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `VIBEMQ__` prefix with double underscores for nesting:
    ///    - `VIBEMQ__LOG__LEVEL=debug` overrides `log.level`
    ///    - `VIBEMQ__RETAIN__MODE=drop` overrides `retain.mode`
    ///    - `VIBEMQ__PERSISTENCE__STORAGE_DIR=/var/lib/vibemq` overrides `persistence.storage_dir`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("log.level", "info")?
            .set_default("limits.max_qos_bytes_pending", 0)?
            .set_default("limits.max_qos_msg_pending_per_client", 65535)?
            .set_default("retain.mode", "enabled")?
            .set_default("persistence.enabled", true)?
            .set_default("persistence.storage_dir", "./data")?
            .set_default("persistence.retained_file", "retained.db")?
            .set_default("persistence.checkpoint_interval", "5m")?
            .set_default("persistence.max_file_size", 1024_i64 * 1024 * 1024)?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content)?;
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("VIBEMQ")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Note: 0 means unbounded for max_qos_bytes_pending

        if self.persistence.checkpoint_interval.is_zero() {
            return Err(ConfigError::Validation(
                "persistence.checkpoint_interval must be greater than zero".to_string(),
            ));
        }

        if self.persistence.max_file_size == 0 {
            return Err(ConfigError::Validation(
                "persistence.max_file_size must be greater than zero".to_string(),
            ));
        }

        if self.persistence.retained_file.is_empty() {
            return Err(ConfigError::Validation(
                "persistence.retained_file must not be empty".to_string(),
            ));
        }

        if let Some(expire) = self.retain.expire_after {
            let max = Duration::from_secs(u32::MAX as u64);
            if expire < Duration::from_secs(1) || expire > max {
                return Err(ConfigError::Validation(format!(
                    "retain.expire_after must be between 1s and {}s",
                    u32::MAX
                )));
            }
        }

        Ok(())
    }
}
