//! The I/O thread behind one open transport.

use crate::adapter::ConnectionAdapter;
use crate::error::KeepAliveError;
use crate::port::{PortError, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

const READ_CHUNK: usize = 1024;

/// Reads from a transport on a dedicated thread and feeds an adapter.
///
/// The thread lets the transport [settle](Transport::settle), then reports
/// `connection_made` before its first read. It reports `connection_lost`
/// exactly once when it exits: with `None` after [`close`](Self::close), with
/// the error when settling or a read fails. A session that fails to settle
/// never reports `connection_made`. Read timeouts are not failures; they only
/// bound how long `close` takes.
pub struct ReaderThread {
    port: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReaderThread {
    /// Start reading `transport` on behalf of `adapter`.
    pub fn spawn(
        transport: Box<dyn Transport>,
        adapter: Arc<ConnectionAdapter>,
    ) -> Result<Self, KeepAliveError> {
        let port = transport.name().to_string();
        let writer = transport.try_clone_transport()?;
        let stop = Arc::new(AtomicBool::new(false));

        let handle = thread::Builder::new()
            .name(format!("reader {port}"))
            .spawn({
                let stop = stop.clone();
                let port = port.clone();
                move || read_loop(port, transport, writer, adapter, stop)
            })
            .map_err(|source| KeepAliveError::Spawn {
                what: "reader",
                source,
            })?;

        Ok(Self {
            port,
            stop,
            handle: Some(handle),
        })
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Whether the read loop is still running.
    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the loop and wait for the thread to exit. The transport is closed
    /// when this returns. Idempotent.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(port = %self.port, "Reader thread panicked");
            }
        }
    }
}

impl Drop for ReaderThread {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ReaderThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderThread")
            .field("port", &self.port)
            .field("alive", &self.is_alive())
            .finish()
    }
}

fn read_loop(
    port: String,
    mut transport: Box<dyn Transport>,
    writer: Box<dyn Transport>,
    adapter: Arc<ConnectionAdapter>,
    stop: Arc<AtomicBool>,
) {
    if let Err(e) = transport.settle() {
        debug!(port = %port, error = %e, "Transport failed to settle");
        drop(writer);
        drop(transport);
        adapter.connection_lost(Some(e));
        return;
    }
    if stop.load(Ordering::SeqCst) {
        drop(writer);
        drop(transport);
        adapter.connection_lost(None);
        return;
    }
    adapter.connection_made(&port, writer);

    let mut buffer = [0u8; READ_CHUNK];
    let mut failure: Option<PortError> = None;
    while !stop.load(Ordering::SeqCst) {
        match transport.read_bytes(&mut buffer) {
            Ok(n) => adapter.data_received(&buffer[..n]),
            Err(e) if e.is_idle() => continue,
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    debug!(port = %port, failed = failure.is_some(), "Read loop finished");
    drop(transport);
    adapter.connection_lost(failure);
}
