//! Command-line arguments of the bridge binaries

use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};
use tracing::Level;

/// Log level for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum LogLevel {
    /// Only errors
    #[default]
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    /// Parse a level name as written in the settings file
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

/// Flags shared by both bridge binaries
#[derive(Args, Debug, Default)]
pub struct CommonArgs {
    /// Print component documentation in JSON
    #[arg(long)]
    pub json: bool,

    /// Enable debug mode
    #[arg(long)]
    pub debug: bool,

    /// Settings file path (TOML format)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    pub log_level: Option<LogLevel>,
}

impl CommonArgs {
    /// `--debug` wins over `--log-level`, which wins over the settings file
    pub fn resolve_log_level(&self, configured: &str) -> LogLevel {
        if self.debug {
            return LogLevel::Debug;
        }
        self.log_level
            .or_else(|| LogLevel::from_name(configured))
            .unwrap_or_default()
    }
}

/// Endpoints of the ports a component was started with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEndpoints {
    pub options: String,
    /// IN for the publisher, OUT for the subscriber
    pub data: String,
    pub errors: Option<String>,
}

/// mqtt-pub: publishes IPs from the IN port to an MQTT broker
#[derive(Parser, Debug)]
#[command(name = "mqtt-pub")]
#[command(version)]
#[command(about = "Publishes IPs received on IN to an MQTT broker")]
pub struct PubArgs {
    /// Component's options port endpoint
    #[arg(long = "port.options", value_name = "ENDPOINT")]
    pub options: Option<String>,

    /// Component's input port endpoint
    #[arg(long = "port.in", value_name = "ENDPOINT")]
    pub input: Option<String>,

    /// Component's error port endpoint
    #[arg(long = "port.err", value_name = "ENDPOINT")]
    pub errors: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl PubArgs {
    /// `None` when a required port flag is missing
    pub fn endpoints(&self) -> Option<PortEndpoints> {
        Some(PortEndpoints {
            options: non_empty(&self.options)?,
            data: non_empty(&self.input)?,
            errors: non_empty(&self.errors),
        })
    }
}

/// mqtt-sub: emits messages from an MQTT subscription on the OUT port
#[derive(Parser, Debug)]
#[command(name = "mqtt-sub")]
#[command(version)]
#[command(about = "Sends messages from an MQTT subscription to OUT")]
pub struct SubArgs {
    /// Component's options port endpoint
    #[arg(long = "port.options", value_name = "ENDPOINT")]
    pub options: Option<String>,

    /// Component's output port endpoint
    #[arg(long = "port.out", value_name = "ENDPOINT")]
    pub output: Option<String>,

    /// Component's error port endpoint
    #[arg(long = "port.err", value_name = "ENDPOINT")]
    pub errors: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl SubArgs {
    /// `None` when a required port flag is missing
    pub fn endpoints(&self) -> Option<PortEndpoints> {
        Some(PortEndpoints {
            options: non_empty(&self.options)?,
            data: non_empty(&self.output)?,
            errors: non_empty(&self.errors),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}
