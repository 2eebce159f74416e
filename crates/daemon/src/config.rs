//! Configuration management for the ZipDrop relay.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/zipdrop/config.toml`.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::share::{DYNAMIC_PORT_END, DYNAMIC_PORT_START};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("workers must be between 1 and 1024, got {0}")]
    InvalidWorkers(usize),

    #[error("max_body_size must be greater than 0, got {0}")]
    InvalidMaxBodySize(u64),

    #[error("request_timeout_secs must be between 1 and 3600 seconds, got {0}")]
    InvalidRequestTimeout(u64),

    #[error("port range must satisfy 1024 <= start < end, got {start}..{end}")]
    InvalidPortRange { start: u16, end: u16 },

    #[error("max_attempts must be greater than 0, got {0}")]
    InvalidMaxAttempts(usize),

    #[error("chunk_size must be greater than 0, got {0}")]
    InvalidChunkSize(usize),

    #[error("accept_timeout_secs must be between 0 and 86400 seconds, got {0}")]
    InvalidAcceptTimeout(u64),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the ZipDrop relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Upload listener configuration.
    pub http: HttpConfig,

    /// One-shot share configuration.
    pub share: ShareConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory where uploaded files are staged before sharing.
    pub upload_dir: PathBuf,
}

/// Upload listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Address the upload listener binds to.
    pub bind_addr: IpAddr,

    /// Port the upload listener binds to.
    pub port: u16,

    /// Maximum number of requests handled concurrently.
    pub workers: usize,

    /// Maximum accepted request body size in bytes (default: 100MB).
    pub max_body_size: u64,

    /// Seconds a client gets to send a complete request.
    pub request_timeout_secs: u64,
}

/// One-shot share configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShareConfig {
    /// Address transfer listeners bind to.
    pub bind_addr: IpAddr,

    /// First port (inclusive) handed out for shares.
    pub port_range_start: u16,

    /// Last port (exclusive) handed out for shares.
    pub port_range_end: u16,

    /// Allocation attempts before an offer fails with a capacity error.
    pub max_attempts: usize,

    /// Seconds to wait for a downloader before releasing the port (0 = wait forever).
    pub accept_timeout_secs: u64,

    /// Size of the chunks a file is streamed in.
    pub chunk_size: usize,

    /// Delete the staged upload once its share has ended.
    pub remove_after_transfer: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            upload_dir: default_upload_dir(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
            workers: 10,
            max_body_size: 100 * 1024 * 1024, // 100MB
            request_timeout_secs: 30,
        }
    }
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            port_range_start: DYNAMIC_PORT_START,
            port_range_end: DYNAMIC_PORT_END,
            max_attempts: 1024,
            accept_timeout_secs: 0,
            chunk_size: 64 * 1024,
            remove_after_transfer: true,
        }
    }
}

impl HttpConfig {
    /// Deadline for reading one request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ShareConfig {
    /// The accept timeout, or `None` when downloaders may take forever.
    pub fn accept_timeout(&self) -> Option<Duration> {
        (self.accept_timeout_secs > 0).then(|| Duration::from_secs(self.accept_timeout_secs))
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("zipdrop")
        .join("config.toml")
}

/// Returns the default staging directory for uploads.
fn default_upload_dir() -> PathBuf {
    std::env::temp_dir().join("zipdrop-uploads")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - ZIPDROP_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - ZIPDROP_HTTP_PORT: Override the upload listener port
    /// - ZIPDROP_UPLOAD_DIR: Override the staging directory
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("ZIPDROP_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(port) = std::env::var("ZIPDROP_HTTP_PORT") {
            if !port.is_empty() {
                match port.parse::<u16>() {
                    Ok(port) => {
                        tracing::info!("Overriding http port from environment: {}", port);
                        self.http.port = port;
                    }
                    Err(e) => {
                        tracing::warn!(value = %port, error = %e, "Ignoring invalid ZIPDROP_HTTP_PORT");
                    }
                }
            }
        }

        if let Ok(dir) = std::env::var("ZIPDROP_UPLOAD_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding upload_dir from environment: {}", dir);
                self.daemon.upload_dir = PathBuf::from(dir);
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate workers: 1-1024
        if self.http.workers < 1 || self.http.workers > 1024 {
            return Err(ConfigError::InvalidWorkers(self.http.workers));
        }

        if self.http.max_body_size == 0 {
            return Err(ConfigError::InvalidMaxBodySize(self.http.max_body_size));
        }

        // Validate request_timeout_secs: 1-3600
        if self.http.request_timeout_secs == 0 || self.http.request_timeout_secs > 3600 {
            return Err(ConfigError::InvalidRequestTimeout(
                self.http.request_timeout_secs,
            ));
        }

        let (start, end) = (self.share.port_range_start, self.share.port_range_end);
        if start < 1024 || start >= end {
            return Err(ConfigError::InvalidPortRange { start, end });
        }

        if self.share.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(self.share.max_attempts));
        }

        if self.share.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(self.share.chunk_size));
        }

        // Validate accept_timeout_secs: 0-86400
        if self.share.accept_timeout_secs > 86400 {
            return Err(ConfigError::InvalidAcceptTimeout(
                self.share.accept_timeout_secs,
            ));
        }

        // Validate log_level is a known value
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
