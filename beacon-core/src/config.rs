//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/beacon/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/beacon/` (~/.config/beacon/)
//! - Data: `$XDG_DATA_HOME/beacon/` (~/.local/share/beacon/)
//! - State/Logs: `$XDG_STATE_HOME/beacon/` (~/.local/state/beacon/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Largest batch the delivery endpoint accepts in one request
pub const MAX_BATCH_LIMIT: usize = 500;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Event collection and delivery
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for `beacon.log`; defaults to the XDG state directory
    pub directory: Option<PathBuf>,

    /// Also echo warnings and errors to stderr
    #[serde(default)]
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            stderr: false,
        }
    }
}

impl LoggingConfig {
    /// Directory log files are written to
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(Config::state_dir)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Event collector configuration
///
/// Controls which app key events are recorded under, where batches are
/// delivered, and the batching policy of the flush worker.
#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    /// Application key every stored event and payload is scoped to
    pub app_key: Option<String>,

    /// Shared secret, sent as a bearer token when present
    pub secret_key: Option<String>,

    /// Collector server URL (e.g., `https://collector.example.com`)
    pub server_url: Option<String>,

    /// Device type code reported in every payload
    #[serde(default = "default_device_type")]
    pub device_type: String,

    /// Pending events required before an add triggers a flush
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,

    /// Events per delivery request
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Override for the event database location
    pub database_path: Option<PathBuf>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            app_key: None,
            secret_key: None,
            server_url: None,
            device_type: default_device_type(),
            min_batch_size: default_min_batch_size(),
            max_batch_size: default_max_batch_size(),
            timeout_secs: default_timeout(),
            database_path: None,
        }
    }
}

impl CollectorConfig {
    /// Check if the collector has everything it needs to deliver events
    pub fn is_ready(&self) -> bool {
        self.app_key.is_some() && self.server_url.is_some() && self.validate().is_ok()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        match self.app_key.as_deref() {
            None | Some("") => {
                return Err(Error::Config("collector.app_key is required".to_string()));
            }
            Some(_) => {}
        }
        if self.server_url.is_none() {
            return Err(Error::Config(
                "collector.server_url is required".to_string(),
            ));
        }
        if self.min_batch_size == 0 {
            return Err(Error::Config(
                "collector.min_batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_batch_size == 0 || self.max_batch_size > MAX_BATCH_LIMIT {
            return Err(Error::Config(format!(
                "collector.max_batch_size must be between 1 and {}",
                MAX_BATCH_LIMIT
            )));
        }
        if self.min_batch_size > self.max_batch_size {
            return Err(Error::Config(
                "collector.min_batch_size cannot exceed collector.max_batch_size".to_string(),
            ));
        }
        Ok(())
    }

    /// Database file to use, honoring the configured override
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(Config::database_path)
    }
}

fn default_device_type() -> String {
    "3".to_string()
}

fn default_min_batch_size() -> usize {
    1
}

fn default_max_batch_size() -> usize {
    50
}

fn default_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/beacon/config.toml` (~/.config/beacon/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("beacon").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("beacon")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("beacon")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/beacon/events.db` (~/.local/share/beacon/events.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("events.db")
    }
}
