//! Turns transport events into a `connected`/`disconnected` condition pair.
//!
//! A [`ConnectionAdapter`] is bound to one open transport. It owns no thread;
//! the [`ReaderThread`](crate::reader::ReaderThread) that drives the transport
//! calls into it. It never retries or reconnects on its own.

use crate::error::KeepAliveError;
use crate::event::BinaryCondition;
use crate::port::{PortError, Transport};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Receives raw inbound bytes, unmodified, in arrival order.
///
/// Called from the I/O thread, so implementations must not block.
pub trait DataSink: Send + Sync {
    fn data_received(&self, data: &[u8]);
}

impl<F> DataSink for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn data_received(&self, data: &[u8]) {
        self(data)
    }
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl DataSink for DiscardSink {
    fn data_received(&self, _data: &[u8]) {}
}

/// Per-connection protocol object.
///
/// Once the first transport event has been processed exactly one of
/// [`connected`](Self::connected) and [`disconnected`](Self::disconnected) is
/// set: every transition clears the old flag before setting the new one.
pub struct ConnectionAdapter {
    port: Mutex<Option<String>>,
    connected: BinaryCondition,
    disconnected: BinaryCondition,
    writer: Mutex<Option<Box<dyn Transport>>>,
    last_error: Mutex<Option<Arc<PortError>>>,
    sink: Arc<dyn DataSink>,
}

impl ConnectionAdapter {
    pub fn new(sink: Arc<dyn DataSink>) -> Self {
        Self {
            port: Mutex::new(None),
            connected: BinaryCondition::new("adapter.connected"),
            disconnected: BinaryCondition::new("adapter.disconnected"),
            writer: Mutex::new(None),
            last_error: Mutex::new(None),
            sink,
        }
    }

    /// The transport is open. `writer` is the handle used by [`Self::write`].
    pub fn connection_made(&self, port: &str, writer: Box<dyn Transport>) {
        debug!(port = %port, transport = ?writer, "connection_made");
        *self.port.lock() = Some(port.to_string());
        *self.writer.lock() = Some(writer);
        self.disconnected.clear();
        self.connected.set();
    }

    /// Forward a chunk of inbound bytes to the sink.
    pub fn data_received(&self, data: &[u8]) {
        self.sink.data_received(data);
    }

    /// The transport closed, gracefully (`None`) or because of `error`.
    ///
    /// The write handle is released before `disconnected` fires, so nothing
    /// can write to a torn-down transport after observing it.
    pub fn connection_lost(&self, error: Option<PortError>) {
        let port = self.port().unwrap_or_default();
        match &error {
            Some(e) => debug!(port = %port, error = %e, "Connection lost"),
            None => debug!(port = %port, "Connection closed"),
        }
        if let Some(e) = error {
            *self.last_error.lock() = Some(Arc::new(e));
        }

        self.connected.clear();
        self.writer.lock().take();
        self.disconnected.set();
    }

    /// Write through the bound transport.
    ///
    /// Best effort: fails with [`KeepAliveError::NotConnected`] once the
    /// connection is gone, and never queues.
    pub fn write(&self, data: &[u8]) -> Result<usize, KeepAliveError> {
        let mut writer = self.writer.lock();
        let transport = writer.as_mut().ok_or(KeepAliveError::NotConnected)?;
        Ok(transport.write_bytes(data)?)
    }

    pub fn connected(&self) -> &BinaryCondition {
        &self.connected
    }

    pub fn disconnected(&self) -> &BinaryCondition {
        &self.disconnected
    }

    /// Port recorded by the last `connection_made`.
    pub fn port(&self) -> Option<String> {
        self.port.lock().clone()
    }

    /// Error that ended the connection, if it did not close gracefully.
    pub fn last_error(&self) -> Option<Arc<PortError>> {
        self.last_error.lock().clone()
    }
}

impl std::fmt::Debug for ConnectionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionAdapter")
            .field("port", &self.port())
            .field("connected", &self.connected.is_set())
            .field("disconnected", &self.disconnected.is_set())
            .finish()
    }
}
