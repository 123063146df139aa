//! Configuration loading for homesync clients.
//!
//! Configuration is loaded from a TOML file (default: `homesync.toml`).
//! Every section and field is optional; missing values fall back to the
//! defaults below.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use homesync_core::{BackoffPolicy, EchoConfig};

use crate::connection::ConnectionConfig;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    /// Push channel configuration.
    #[serde(default)]
    pub connection: ConnectionSection,
    /// Echo suppression configuration.
    #[serde(default)]
    pub echo: EchoSection,
    /// Cache batching configuration.
    #[serde(default)]
    pub batch: BatchSection,
    /// Write request configuration.
    #[serde(default)]
    pub writes: WritesSection,
}

/// Push channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSection {
    /// WebSocket endpoint (default: ws://localhost:8090/ws).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Bearer token. Usually supplied at runtime instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Keepalive ping interval in seconds (default: 30).
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// First reconnect delay in milliseconds (default: 1000).
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    /// Longest reconnect delay in milliseconds (default: 30000).
    #[serde(default = "default_reconnect_cap_ms")]
    pub reconnect_cap_ms: u64,
    /// Reconnect attempts before giving up (default: 10).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

/// Echo suppression configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoSection {
    /// Lifetime of a local-write mark in milliseconds (default: 2000).
    #[serde(default = "default_echo_ttl_ms")]
    pub ttl_ms: u64,
    /// Age below which a push notice is treated as our own echo (default: 1500).
    /// Must be shorter than `ttl_ms`.
    #[serde(default = "default_suppress_window_ms")]
    pub suppress_window_ms: u64,
}

/// Cache batching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSection {
    /// Quiet period before queued updates are flushed, in milliseconds (default: 100).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

/// Write request configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WritesSection {
    /// Upper bound on a write round trip in seconds (default: 10).
    #[serde(default = "default_write_timeout_secs")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_endpoint() -> String {
    "ws://localhost:8090/ws".to_string()
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_reconnect_base_ms() -> u64 {
    1000
}

fn default_reconnect_cap_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_echo_ttl_ms() -> u64 {
    2000
}

fn default_suppress_window_ms() -> u64 {
    1500
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_write_timeout_secs() -> u64 {
    10
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token: None,
            ping_interval_secs: default_ping_interval_secs(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_cap_ms: default_reconnect_cap_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl Default for EchoSection {
    fn default() -> Self {
        Self {
            ttl_ms: default_echo_ttl_ms(),
            suppress_window_ms: default_suppress_window_ms(),
        }
    }
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for WritesSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_write_timeout_secs(),
        }
    }
}

impl HubConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint_url()?;

        let connection = &self.connection;
        if connection.ping_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "connection.ping_interval_secs must be positive".into(),
            ));
        }
        if connection.reconnect_base_ms == 0 {
            return Err(ConfigError::Invalid(
                "connection.reconnect_base_ms must be positive".into(),
            ));
        }
        if connection.reconnect_base_ms > connection.reconnect_cap_ms {
            return Err(ConfigError::Invalid(
                "connection.reconnect_base_ms must not exceed reconnect_cap_ms".into(),
            ));
        }
        if self.echo.suppress_window_ms >= self.echo.ttl_ms {
            return Err(ConfigError::Invalid(
                "echo.suppress_window_ms must be shorter than echo.ttl_ms".into(),
            ));
        }
        if self.batch.debounce_ms == 0 {
            return Err(ConfigError::Invalid(
                "batch.debounce_ms must be positive".into(),
            ));
        }
        if self.writes.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "writes.timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The push endpoint as a URL. Only `ws` and `wss` are accepted.
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let endpoint = &self.connection.endpoint;
        let url = Url::parse(endpoint).map_err(|e| ConfigError::InvalidEndpoint {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::InvalidEndpoint {
                endpoint: endpoint.clone(),
                reason: format!("unsupported scheme {other:?}"),
            }),
        }
    }

    /// Reconnect backoff.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.connection.reconnect_base_ms),
            cap: Duration::from_millis(self.connection.reconnect_cap_ms),
            max_attempts: self.connection.max_reconnect_attempts,
        }
    }

    /// Push channel settings.
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        Ok(ConnectionConfig {
            endpoint: self.endpoint_url()?,
            ping_interval: Duration::from_secs(self.connection.ping_interval_secs),
            backoff: self.backoff(),
        })
    }

    /// Echo suppression timing.
    pub fn echo(&self) -> EchoConfig {
        EchoConfig {
            ttl: Duration::from_millis(self.echo.ttl_ms),
            suppress_window: Duration::from_millis(self.echo.suppress_window_ms),
        }
    }

    /// Batch debounce.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.batch.debounce_ms)
    }

    /// Write timeout.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.writes.timeout_secs)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// The endpoint is not a usable WebSocket URL.
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// Endpoint as configured.
        endpoint: String,
        /// Why it was refused.
        reason: String,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
