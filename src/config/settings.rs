//! Server settings file
//!
//! Loads `[server]` and `[connection]` sections from a TOML file. Every field
//! has a default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::connection::{
    ConnectionOptions, HeartbeatKind, DEFAULT_CLOSE_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_HEARTBEAT_PAYLOAD, DEFAULT_QUEUE_CAPACITY,
};
use crate::server::ServerConfig;

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 7777;
pub const DEFAULT_PATH: &str = "/ws";

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Request path accepted for the upgrade
    pub path: String,
    /// Origins allowed to upgrade; empty or `*` allows all
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            allowed_origins: Vec::new(),
        }
    }
}

/// Per-connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionSettings {
    pub queue_capacity: usize,
    /// Heartbeat period in milliseconds; 0 disables heartbeats
    pub heartbeat_interval_ms: u64,
    pub heartbeat_kind: HeartbeatKind,
    pub heartbeat_payload: String,
    pub close_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64,
            heartbeat_kind: HeartbeatKind::default(),
            heartbeat_payload: DEFAULT_HEARTBEAT_PAYLOAD.to_string(),
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub connection: ConnectionSettings,
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "connection.queue_capacity must be at least 1".to_string(),
            ));
        }
        if !self.server.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "server.path must start with '/': {}",
                self.server.path
            )));
        }
        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.server.bind.clone(), self.server.port)
            .with_path(self.server.path.clone())
            .with_allowed_origins(self.server.allowed_origins.clone())
            .with_connection(self.connection_options())
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        let conn = &self.connection;
        ConnectionOptions::new()
            .with_queue_capacity(conn.queue_capacity)
            .with_heartbeat_interval(Duration::from_millis(conn.heartbeat_interval_ms))
            .with_heartbeat(conn.heartbeat_kind, conn.heartbeat_payload.clone())
            .with_close_timeout(Duration::from_millis(conn.close_timeout_ms))
    }
}
