//! Engine configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via GAMEQ_CONFIG or --config)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest accepted receive buffer.
pub const MIN_DATAGRAM_SIZE: usize = 1024;

/// Largest accepted receive buffer.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Surface per-server errors instead of reporting the server offline.
    pub debug: bool,
    /// Socket and timing configuration.
    pub query: QueryConfig,
    /// Raw packet capture.
    pub capture: CaptureConfig,
}

impl Config {
    /// Loads configuration from `path` (or GAMEQ_CONFIG when `None`), then
    /// applies environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("GAMEQ_CONFIG").ok().map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(debug) = std::env::var("GAMEQ_DEBUG") {
            self.debug = debug == "1" || debug.to_lowercase() == "true";
        }
        self.query.apply_env_overrides();
        self.capture.apply_env_overrides();
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.query.validate()
    }
}

/// Query timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Deadline shared by all servers of one phase, in seconds.
    pub timeout_secs: u64,
    /// Longest wait for any socket to become readable, in microseconds.
    pub poll_interval_micros: u64,
    /// Pause after each packet write, in microseconds.
    pub write_wait_micros: u64,
    /// Receive buffer size per read.
    pub max_datagram_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 3,
            poll_interval_micros: 200_000,
            write_wait_micros: 500,
            max_datagram_size: 32 * 1024,
        }
    }
}

impl QueryConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(timeout) = std::env::var("GAMEQ_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.timeout_secs = secs;
            }
        }

        if let Ok(interval) = std::env::var("GAMEQ_POLL_INTERVAL") {
            if let Ok(micros) = interval.parse() {
                self.poll_interval_micros = micros;
            }
        }

        if let Ok(wait) = std::env::var("GAMEQ_WRITE_WAIT") {
            if let Ok(micros) = wait.parse() {
                self.write_wait_micros = micros;
            }
        }

        if let Ok(size) = std::env::var("GAMEQ_MAX_DATAGRAM_SIZE") {
            if let Ok(n) = size.parse() {
                self.max_datagram_size = n;
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_micros)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_micros(self.write_wait_micros)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "query.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_micros == 0 {
            return Err(ConfigError::ValidationError(
                "query.poll_interval_micros must be greater than zero".to_string(),
            ));
        }
        if !(MIN_DATAGRAM_SIZE..=MAX_DATAGRAM_SIZE).contains(&self.max_datagram_size) {
            return Err(ConfigError::ValidationError(format!(
                "query.max_datagram_size must be between {} and {}",
                MIN_DATAGRAM_SIZE, MAX_DATAGRAM_SIZE
            )));
        }
        Ok(())
    }
}

/// Packet capture configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// File receiving each server's raw responses before decoding.
    pub packets_file: Option<PathBuf>,
}

impl CaptureConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("GAMEQ_CAPTURE_FILE") {
            self.packets_file = Some(PathBuf::from(path));
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
