//! Port-specific error types.
//!
//! Transport-level failures, kept separate from the connection manager's
//! errors so the manager can classify them at its boundary.

use std::io::ErrorKind;
use thiserror::Error;

/// Errors that can occur while enumerating, opening or using a serial port.
#[derive(Debug, Error)]
pub enum PortError {
    /// The specified serial port was not found on the system.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// An I/O error occurred during port operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Port configuration was rejected.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The device went away while the port was open.
    #[error("Serial port disconnected: {0}")]
    Disconnected(String),

    /// Auto-detection found no port that passed the connection test.
    #[error("Could not connect to a serial device (tried: {})", .0.join(", "))]
    NoMatch(Vec<String>),

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a Timeout error from a duration.
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout(duration)
    }

    /// Create a Disconnected error from a port name.
    pub fn disconnected(port_name: impl Into<String>) -> Self {
        Self::Disconnected(port_name.into())
    }

    /// True for read results that only mean "nothing arrived yet".
    pub fn is_idle(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// True when the port is simply not there right now (unplugged, not yet
    /// enumerated). Everything else on open is treated as misconfiguration.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Serial(e) => e.kind() == serialport::ErrorKind::NoDevice,
            _ => false,
        }
    }
}
