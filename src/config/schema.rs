//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use crate::keepalive::KeepAliveOptions;
use crate::port::{DataBits, FlowControl, Parity, PortConfiguration, StopBits};
use crate::request::PollMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which port to keep alive and how to talk to it
    pub connection: ConnectionConfig,
    /// Connection manager tuning
    pub keepalive: KeepAliveConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Connection configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Port to connect to when none is given on the command line
    pub port: Option<String>,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Transport read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Port aliases for convenience
    pub port_aliases: HashMap<String, String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let port = PortConfiguration::default();
        Self {
            port: None,
            baud_rate: port.baud_rate,
            data_bits: port.data_bits,
            parity: port.parity,
            stop_bits: port.stop_bits,
            flow_control: port.flow_control,
            read_timeout_ms: port.timeout.as_millis() as u64,
            port_aliases: HashMap::new(),
        }
    }
}

impl ConnectionConfig {
    /// Parameter bag handed to the transport on every open.
    pub fn port_configuration(&self) -> PortConfiguration {
        PortConfiguration {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            flow_control: self.flow_control,
            parity: self.parity,
            stop_bits: self.stop_bits,
            timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }

    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

/// Connection manager section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    /// Limit on the first connection, in milliseconds. Unset waits forever.
    pub connect_timeout_ms: Option<u64>,
    /// Port availability poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Probe ports during enumeration and skip the ones that refuse
    pub only_available: bool,
    /// Default wait of write/request calls, in milliseconds. Unset waits forever.
    pub default_timeout_ms: Option<u64>,
    /// How `request` waits for responses
    pub response_wait: ResponseWait,
    /// Response frame terminator
    pub terminator: String,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: None,
            poll_interval_ms: 2000,
            only_available: true,
            default_timeout_ms: None,
            response_wait: ResponseWait::Auto,
            terminator: "\n".to_string(),
        }
    }
}

impl KeepAliveConfig {
    pub fn options(&self) -> KeepAliveOptions {
        KeepAliveOptions {
            connect_timeout: self.connect_timeout_ms.map(Duration::from_millis),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            only_available: self.only_available,
            default_timeout: self.default_timeout_ms.map(Duration::from_millis),
            poll_mode: self.response_wait.resolve(),
        }
    }
}

/// Response wait policy as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseWait {
    /// Polling on Windows, blocking elsewhere
    #[default]
    Auto,
    Blocking,
    Polling,
}

impl ResponseWait {
    pub fn resolve(self) -> PollMode {
        match self {
            Self::Auto => PollMode::platform_default(),
            Self::Blocking => PollMode::Blocking,
            Self::Polling => PollMode::Polling,
        }
    }
}

impl std::str::FromStr for ResponseWait {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "blocking" | "block" => Ok(Self::Blocking),
            "polling" | "poll" => Ok(Self::Polling),
            other => Err(format!("expected auto, blocking or polling, got `{other}`")),
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error", or any
    /// `EnvFilter` directive
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
    /// Colored output
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            ansi: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}
