//! Client configuration.
//!
//! # File format (for beginners)
//!
//! The configuration is a TOML file with two sections.  Every field is
//! optional; a missing field takes the default shown here:
//!
//! ```toml
//! [connection]
//! host = "localhost"
//! port = 5672
//! vhost = "/"
//! username = "guest"
//! password = "guest"
//! transport = "tcp"        # or "websocket"
//! # url = "ws://localhost:15670/ws/amqp"   (websocket only)
//! frame_max = 4096         # 0 accepts the broker's value
//! channel_max = 0          # 0 accepts the broker's value
//! heartbeat = 0            # seconds, 0 disables
//!
//! [logging]
//! log_level = "info"
//! ```
//!
//! Fields annotated with `#[serde(default = "some_fn")]` fall back to
//! `some_fn()` when absent, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use amqp_wire::protocol::frame::MIN_FRAME_MAX;

/// Error type for loading and validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

// ── Schema ────────────────────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which byte-stream transport carries the AMQP frames.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    /// Binary WebSocket messages, as served by the broker's web-AMQP plugin.
    WebSocket,
}

/// Broker address, credentials and tuning preferences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    /// Shown in the broker's management UI as `connection_name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub transport: TransportKind,
    /// WebSocket endpoint; when absent one is built from host and port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Largest frame the client accepts; 0 accepts whatever the broker offers.
    #[serde(default = "default_frame_max")]
    pub frame_max: u32,
    /// Highest channel id; 0 accepts the broker's limit.
    #[serde(default)]
    pub channel_max: u16,
    /// Heartbeat interval in seconds; 0 disables heartbeats.
    #[serde(default)]
    pub heartbeat: u16,
}

/// Logging preferences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    5672
}
fn default_vhost() -> String {
    "/".to_string()
}
fn default_username() -> String {
    "guest".to_string()
}
fn default_password() -> String {
    "guest".to_string()
}
fn default_frame_max() -> u32 {
    MIN_FRAME_MAX
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            vhost: default_vhost(),
            username: default_username(),
            password: default_password(),
            name: None,
            transport: TransportKind::default(),
            url: None,
            frame_max: default_frame_max(),
            channel_max: 0,
            heartbeat: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl ConnectionConfig {
    /// Checks values the broker would otherwise reject mid-handshake.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `frame_max` is between 1 and
    /// 4095, or when `port` is 0.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_max != 0 && self.frame_max < MIN_FRAME_MAX {
            return Err(ConfigError::Invalid(format!(
                "frame_max must be 0 or at least {MIN_FRAME_MAX}, got {}",
                self.frame_max
            )));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must not be 0".to_string()));
        }
        Ok(())
    }

    /// The WebSocket URL to dial: `url` if set, else `ws://host:port/`.
    pub fn websocket_url(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| format!("ws://{}:{}/", self.host, self.port))
    }
}

impl ClientConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::Invalid`]
    /// for out-of-range values.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`ClientConfig::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
