//! Connection manager errors.
//!
//! Transport failures ([`PortError`]) are classified by the worker into the
//! variants below; callers only ever see a `KeepAliveError`.

use crate::port::PortError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for connection manager operations.
pub type KeepAliveResult<T> = Result<T, KeepAliveError>;

/// Unified error type of the connection manager.
#[derive(Debug, Error)]
pub enum KeepAliveError {
    /// The target port was missing from the first enumeration. Never retried.
    #[error("Port `{port}` not available. Available ports: {}", .available.join(", "))]
    PortUnavailable {
        port: String,
        available: Vec<String>,
    },

    /// The port list could not be obtained.
    #[error("Failed to enumerate serial ports: {0}")]
    Enumeration(#[source] PortError),

    /// Opening the transport failed for a reason other than the port being
    /// absent (busy, permissions, bad parameters). Never retried.
    #[error("Failed to open `{port}`: {source}")]
    Open {
        port: String,
        #[source]
        source: PortError,
    },

    /// The first connection did not come up within the connect timeout.
    #[error("Connection not established within {0:?}")]
    ConnectTimeout(Duration),

    /// A scoped connection closed before it ever connected. `cause` is the
    /// worker's error, if it failed rather than timed out.
    #[error("Connection could not be established")]
    ConnectionFailed {
        #[source]
        cause: Option<Arc<KeepAliveError>>,
    },

    /// No live connection when the caller's wait ended.
    #[error("Not connected")]
    NotConnected,

    /// The manager has shut down.
    #[error("Connection is closed")]
    Closed,

    /// A request got no reply in time.
    #[error("No response received{}", within(.0))]
    NoResponse(Option<Duration>),

    /// Writing to the live transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] PortError),

    /// `start()` was called twice.
    #[error("Connection worker already started")]
    AlreadyStarted,

    /// A thread could not be spawned.
    #[error("Failed to spawn {what} thread: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The worker panicked; the connection is closed.
    #[error("Connection worker panicked: {0}")]
    WorkerPanicked(String),
}

fn within(timeout: &Option<Duration>) -> String {
    match timeout {
        Some(t) => format!(" within {t:?}"),
        None => String::new(),
    }
}

impl KeepAliveError {
    /// True for the "no response" error of a timed out request.
    pub fn is_no_response(&self) -> bool {
        matches!(self, Self::NoResponse(_))
    }
}
