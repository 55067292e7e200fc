//! # Configuration Management
//!
//! Centralized configuration for the transport server.
//!
//! This module provides structured configuration for listeners, PROXY header
//! handling, packet size limits and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Example
//! ```toml
//! [server]
//! proxy_protocol = false
//! proxy_header_timeout = 5000
//! max_packet_size = 268435460
//!
//! [[server.listeners]]
//! protocol = "tcp"
//! address = "0.0.0.0:1883"
//!
//! [[server.listeners]]
//! protocol = "ws"
//! address = "0.0.0.0:8080"
//!
//! [logging]
//! app_name = "mqtt-transport"
//! log_level = "info"
//! log_to_console = true
//! json_format = false
//! ```

use crate::core::packet::MAX_PACKET_SIZE;
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Default MQTT over TCP address
pub const DEFAULT_TCP_ADDRESS: &str = "0.0.0.0:1883";

/// Time allowed for a PROXY header to arrive after accept
pub const DEFAULT_PROXY_HEADER_TIMEOUT: Duration = Duration::from_secs(5);

/// Smallest packet the transport can carry (fixed header with zero length)
pub const MIN_PACKET_SIZE: usize = 2;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// A TCP or WebSocket address variable replaces the default listener set.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let tcp = lookup("MQTT_TRANSPORT_TCP_ADDRESS");
        let ws = lookup("MQTT_TRANSPORT_WS_ADDRESS");
        if tcp.is_some() || ws.is_some() {
            config.server.listeners.clear();
            if let Some(address) = tcp {
                config.server.listeners.push(ListenerConfig::tcp(address));
            }
            if let Some(address) = ws {
                config.server.listeners.push(ListenerConfig::websocket(address));
            }
        }

        if let Some(flag) = lookup("MQTT_TRANSPORT_PROXY_PROTOCOL") {
            config.server.proxy_protocol = parse_bool(&flag).ok_or_else(|| {
                ProtocolError::ConfigError(format!("Invalid MQTT_TRANSPORT_PROXY_PROTOCOL: {flag}"))
            })?;
        }

        if let Some(size) = lookup("MQTT_TRANSPORT_MAX_PACKET_SIZE") {
            config.server.max_packet_size = size.parse::<usize>().map_err(|_| {
                ProtocolError::ConfigError(format!(
                    "Invalid MQTT_TRANSPORT_MAX_PACKET_SIZE: {size}"
                ))
            })?;
        }

        if let Some(level) = lookup("MQTT_TRANSPORT_LOG_LEVEL") {
            config.logging.log_level = Level::from_str(&level).map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid MQTT_TRANSPORT_LOG_LEVEL: {level}"))
            })?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Kind of transport a listener serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Raw byte stream, packets framed by the fixed header
    Tcp,
    /// WebSocket upgrade, one packet per binary message
    #[serde(rename = "ws", alias = "websocket")]
    WebSocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => f.write_str("tcp"),
            TransportKind::WebSocket => f.write_str("ws"),
        }
    }
}

/// One accept point
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ListenerConfig {
    pub protocol: TransportKind,
    pub address: String,
}

impl ListenerConfig {
    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            protocol: TransportKind::Tcp,
            address: address.into(),
        }
    }

    pub fn websocket(address: impl Into<String>) -> Self {
        Self {
            protocol: TransportKind::WebSocket,
            address: address.into(),
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Expect a PROXY protocol header in front of every connection
    #[serde(default)]
    pub proxy_protocol: bool,

    /// Time allowed for the PROXY header to arrive
    #[serde(with = "duration_serde", default = "default_proxy_header_timeout")]
    pub proxy_header_timeout: Duration,

    /// Largest packet accepted or sent, fixed header included
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,

    /// Endpoints to accept connections on
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
}

fn default_proxy_header_timeout() -> Duration {
    DEFAULT_PROXY_HEADER_TIMEOUT
}

fn default_max_packet_size() -> usize {
    MAX_PACKET_SIZE
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            proxy_protocol: false,
            proxy_header_timeout: DEFAULT_PROXY_HEADER_TIMEOUT,
            max_packet_size: MAX_PACKET_SIZE,
            listeners: vec![ListenerConfig::tcp(DEFAULT_TCP_ADDRESS)],
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut seen = HashSet::new();
        for listener in &self.listeners {
            if listener.address.is_empty() {
                errors.push(format!("{} listener address cannot be empty", listener.protocol));
                continue;
            }

            match listener.address.parse::<SocketAddr>() {
                Err(_) => errors.push(format!(
                    "Invalid {} listener address format: '{}' (expected format: '0.0.0.0:1883')",
                    listener.protocol, listener.address
                )),
                // Port 0 binds a fresh ephemeral port each time
                Ok(addr) if addr.port() != 0 && !seen.insert(addr) => errors.push(format!(
                    "Duplicate listener address: '{}'",
                    listener.address
                )),
                Ok(_) => {}
            }
        }

        if self.max_packet_size < MIN_PACKET_SIZE {
            errors.push(format!(
                "Max packet size too small: {} (minimum: {MIN_PACKET_SIZE})",
                self.max_packet_size
            ));
        } else if self.max_packet_size > MAX_PACKET_SIZE {
            errors.push(format!(
                "Max packet size too large: {} (protocol maximum: {MAX_PACKET_SIZE})",
                self.max_packet_size
            ));
        }

        if self.proxy_protocol {
            if self.proxy_header_timeout.as_millis() < 10 {
                errors.push("PROXY header timeout too short (minimum: 10ms)".to_string());
            } else if self.proxy_header_timeout.as_secs() > 60 {
                errors.push("PROXY header timeout too long (maximum: 60s)".to_string());
            }
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("mqtt-transport"),
            log_level: Level::INFO,
            log_to_console: true,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if !self.log_to_console {
            errors.push("At least one logging output must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
