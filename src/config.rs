//! Configuration
//!
//! Configuration structures for the chat server and the interactive client.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::listener::ConnectionSettings;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `username:password` records, one per line
    #[serde(default = "default_users_file")]
    pub users_file: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Per-connection outbound queue depth
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    /// Disconnect clients that stay silent this long. Disabled when absent.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// Grace period for flushing a closing connection's output
    #[serde(default = "default_flush_timeout_secs")]
    pub flush_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    12345
}

fn default_users_file() -> PathBuf {
    PathBuf::from("users.txt")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_line_length() -> usize {
    1024
}

fn default_outbox_capacity() -> usize {
    256
}

fn default_flush_timeout_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            users_file: default_users_file(),
            log_level: default_log_level(),
            max_line_length: default_max_line_length(),
            outbox_capacity: default_outbox_capacity(),
            idle_timeout_secs: None,
            flush_timeout_secs: default_flush_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_line_length == 0 {
            return Err(ConfigError::Invalid("max_line_length must be positive".into()));
        }
        if self.outbox_capacity == 0 {
            return Err(ConfigError::Invalid("outbox_capacity must be positive".into()));
        }
        Ok(())
    }

    /// Per-connection limits handed to the listener
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            max_line_length: self.max_line_length,
            outbox_capacity: self.outbox_capacity,
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
            flush_timeout: Duration::from_secs(self.flush_timeout_secs),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_log_level")]
    pub log_level: String,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_client_log_level() -> String {
    "warn".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: default_server_host(),
            port: default_port(),
            log_level: default_client_log_level(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
