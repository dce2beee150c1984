//! Configuration Module
//!
//! Component settings that do not travel on the OPTIONS port:
//! - Logging level
//! - Port connection timeout and transport limits
//! - Broker client timeouts and queue depths
//! - Environment variable overrides (VIBEMQ_FLOW__* prefix)
//!
//! The broker connection itself is configured in-band by the connection URI,
//! see [`crate::uri`].

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::ip::MAX_MESSAGE_SIZE;


/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
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

/// Root settings structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Logging configuration
    pub log: LogConfig,
    /// Flow-network port configuration
    pub ports: PortsConfig,
    /// Broker client configuration
    pub broker: BrokerConfig,
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
    "error".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Flow-network port configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    /// Seconds to wait for port peers before giving up
    #[serde(default = "default_port_connect_timeout")]
    pub connect_timeout: u64,
    /// Largest transport message accepted from a peer, in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Queue depth between socket tasks and the component
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_port_connect_timeout() -> u64 {
    30
}
fn default_max_message_size() -> usize {
    1024 * 1024
}
fn default_channel_capacity() -> usize {
    1024
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_port_connect_timeout(),
            max_message_size: default_max_message_size(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl PortsConfig {
    /// Get the port connect timeout as Duration
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

/// Broker client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Seconds allowed for the initial connection handshake
    #[serde(default = "default_broker_connect_timeout")]
    pub connect_timeout: u64,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u64,
    /// Milliseconds allowed for a graceful disconnect
    #[serde(default = "default_disconnect_grace")]
    pub disconnect_grace: u64,
    /// Queued client requests and undelivered broker messages
    #[serde(default = "default_delivery_capacity")]
    pub delivery_capacity: usize,
    /// Seconds between event loop retries after the connection drops
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: u64,
    /// Largest MQTT packet sent to or accepted from the broker, in bytes
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
}

fn default_broker_connect_timeout() -> u64 {
    10
}
fn default_keep_alive() -> u64 {
    30
}
fn default_disconnect_grace() -> u64 {
    1000
}
fn default_delivery_capacity() -> usize {
    1000
}
fn default_reconnect_delay() -> u64 {
    5
}
/// Room for the largest port message plus topic and packet headers
fn default_max_packet_size() -> usize {
    default_max_message_size() + 64 * 1024
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_broker_connect_timeout(),
            keep_alive: default_keep_alive(),
            disconnect_grace: default_disconnect_grace(),
            delivery_capacity: default_delivery_capacity(),
            reconnect_delay: default_reconnect_delay(),
            max_packet_size: default_max_packet_size(),
        }
    }
}

impl BrokerConfig {
    /// Get the connect timeout as Duration
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Get the keep-alive interval as Duration
    pub fn keep_alive_duration(&self) -> Duration {
        Duration::from_secs(self.keep_alive)
    }

    /// Get the disconnect grace period as Duration
    pub fn disconnect_grace_duration(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace)
    }

    /// Get the reconnect delay as Duration
    pub fn reconnect_delay_duration(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay)
    }
}

impl Settings {
    /// Load settings from an optional TOML file with environment overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `VIBEMQ_FLOW__` prefix with double underscores for nesting:
    ///    - `VIBEMQ_FLOW__LOG__LEVEL=debug` overrides `log.level`
    ///    - `VIBEMQ_FLOW__PORTS__CONNECT_TIMEOUT=60` overrides `ports.connect_timeout`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", default_log_level())?
            .set_default("ports.connect_timeout", default_port_connect_timeout())?
            .set_default("ports.max_message_size", default_max_message_size() as u64)?
            .set_default("ports.channel_capacity", default_channel_capacity() as u64)?
            .set_default("broker.connect_timeout", default_broker_connect_timeout())?
            .set_default("broker.keep_alive", default_keep_alive())?
            .set_default("broker.disconnect_grace", default_disconnect_grace())?
            .set_default("broker.delivery_capacity", default_delivery_capacity() as u64)?
            .set_default("broker.reconnect_delay", default_reconnect_delay())?
            .set_default("broker.max_packet_size", default_max_packet_size() as u64)?;

        if let Some(path) = path {
            let content = std::fs::read_to_string(path)?;
            let substituted = substitute_env_vars(&content);
            builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("VIBEMQ_FLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.log.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            other => {
                return Err(ConfigError::Validation(format!(
                    "unknown log level '{}'",
                    other
                )));
            }
        }

        if self.ports.connect_timeout == 0 {
            return Err(ConfigError::Validation(
                "ports.connect_timeout must be greater than 0".to_string(),
            ));
        }
        if self.ports.max_message_size == 0 || self.ports.max_message_size > MAX_MESSAGE_SIZE {
            return Err(ConfigError::Validation(format!(
                "ports.max_message_size must be between 1 and {}",
                MAX_MESSAGE_SIZE
            )));
        }
        if self.ports.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "ports.channel_capacity must be greater than 0".to_string(),
            ));
        }

        if self.broker.connect_timeout == 0 {
            return Err(ConfigError::Validation(
                "broker.connect_timeout must be greater than 0".to_string(),
            ));
        }
        // rumqttc refuses keep-alive intervals under five seconds
        if self.broker.keep_alive < 5 {
            return Err(ConfigError::Validation(
                "broker.keep_alive must be at least 5 seconds".to_string(),
            ));
        }
        if self.broker.delivery_capacity == 0 {
            return Err(ConfigError::Validation(
                "broker.delivery_capacity must be greater than 0".to_string(),
            ));
        }
        if self.broker.max_packet_size < self.ports.max_message_size {
            return Err(ConfigError::Validation(format!(
                "broker.max_packet_size ({}) must be at least ports.max_message_size ({})",
                self.broker.max_packet_size, self.ports.max_message_size
            )));
        }

        Ok(())
    }
}
