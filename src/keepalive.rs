//! The connection lifecycle manager.
//!
//! A [`KeepAliveConnection`] owns one background worker thread that waits for
//! its port to show up, opens it, watches it through a [`ConnectionAdapter`]
//! and starts over whenever the connection drops. Any number of caller threads
//! can [`write`](KeepAliveConnection::write) and
//! [`request`](KeepAliveConnection::request) concurrently; both block until a
//! connection exists (or their timeout elapses) instead of failing just
//! because the device is momentarily gone.
//!
//! ```text
//! WAITING_FOR_PORT ──▶ CONNECTING ──▶ CONNECTED ──▶ DISCONNECTED_RETRYING
//!        ▲                                                   │
//!        └───────────────────────────────────────────────────┘
//! any state ──close()──▶ CLOSED_CLEAN      any state ──fatal──▶ CLOSED_ERROR
//! ```

use crate::adapter::{ConnectionAdapter, DataSink};
use crate::error::{KeepAliveError, KeepAliveResult};
use crate::event::{BinaryCondition, EventMultiplexer};
use crate::port::{
    DataBits, FlowControl, Parity, PortConfiguration, PortLister, StopBits, SystemSerial,
    TransportFactory,
};
use crate::reader::ReaderThread;
use crate::request::{self, PollMode, ResponseQueue};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Worker tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAliveOptions {
    /// How long the first connection may take. `None` waits forever. Once a
    /// connection has succeeded this is only the re-check interval of later
    /// connection waits; it never ends them.
    pub connect_timeout: Option<Duration>,
    /// How often the port list is checked while waiting for the port.
    pub poll_interval: Duration,
    /// Only count ports that accept a test connection as present.
    pub only_available: bool,
    /// Wait used by `write`, `request` and `enter` when the caller passes
    /// `None`. `None` waits forever.
    pub default_timeout: Option<Duration>,
    /// Response wait discipline of `request` when the caller passes `None`.
    pub poll_mode: PollMode,
}

impl Default for KeepAliveOptions {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            poll_interval: Duration::from_secs(2),
            only_available: true,
            default_timeout: None,
            poll_mode: PollMode::default(),
        }
    }
}

/// Lifecycle state of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    WaitingForPort,
    Connecting,
    Connected,
    DisconnectedRetrying,
    ClosedClean,
    ClosedError,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::ClosedClean | Self::ClosedError)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::WaitingForPort => "WAITING_FOR_PORT",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::DisconnectedRetrying => "DISCONNECTED_RETRYING",
            Self::ClosedClean => "CLOSED_CLEAN",
            Self::ClosedError => "CLOSED_ERROR",
        };
        f.write_str(name)
    }
}

/// Point-in-time snapshot for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub port: String,
    pub state: ConnectionState,
    pub connected: bool,
    pub has_connected_once: bool,
    pub connect_count: usize,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Cause of a `CLOSED_ERROR` shutdown.
    pub error: Option<String>,
}

/// How one connected session ended.
enum SessionEnd {
    CloseRequested,
    Lost,
}

struct Shared {
    port: String,
    config: PortConfiguration,
    options: KeepAliveOptions,
    lister: Arc<dyn PortLister>,
    factory: Arc<dyn TransportFactory>,
    sink: Arc<dyn DataSink>,

    connected: BinaryCondition,
    close_requested: BinaryCondition,
    closed: BinaryCondition,
    error: BinaryCondition,
    has_connected_once: BinaryCondition,
    /// `connected | closed`: what callers of `write`/`request` wait on.
    ready: EventMultiplexer,

    state: Mutex<ConnectionState>,
    adapter: Mutex<Option<Arc<ConnectionAdapter>>>,
    last_error: Mutex<Option<Arc<KeepAliveError>>>,
    connect_count: AtomicUsize,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock();
        let previous = *current;
        if previous != state {
            debug!(port = %self.port, from = %previous, to = %state, "State change");
            *current = state;
        }
    }

    /// Block until the port is listed. `Ok(false)` means close was requested
    /// first.
    fn wait_for_port(&self) -> KeepAliveResult<bool> {
        loop {
            if self.close_requested.is_set() {
                return Ok(false);
            }
            let ports = self
                .lister
                .list_ports(self.options.only_available)
                .map_err(KeepAliveError::Enumeration)?;
            if ports.contains(&self.port) {
                return Ok(true);
            }
            self.close_requested.wait(Some(self.options.poll_interval));
        }
    }

    /// Wait for the adapter to connect, then for it to disconnect.
    fn monitor(&self, adapter: &ConnectionAdapter) -> KeepAliveResult<SessionEnd> {
        // A reader that dies right after connecting only leaves `disconnected`
        // behind, so it is a wake source here too.
        let connect_wait = EventMultiplexer::new([
            adapter.connected().clone(),
            adapter.disconnected().clone(),
            self.close_requested.clone(),
        ]);
        let first_attempt = !self.has_connected_once.is_set();
        while !connect_wait.wait(self.options.connect_timeout) {
            match self.options.connect_timeout {
                Some(timeout) if first_attempt => {
                    return Err(KeepAliveError::ConnectTimeout(timeout));
                }
                _ => debug!(port = %self.port, "Still waiting for the connection"),
            }
        }

        if self.close_requested.is_set() {
            return Ok(SessionEnd::CloseRequested);
        }
        if adapter.disconnected().is_set() {
            return Ok(SessionEnd::Lost);
        }

        self.set_state(ConnectionState::Connected);
        let count = self.connect_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.has_connected_once.set();
        self.connected.set();
        info!(port = %self.port, connect_count = count, "Connected");

        let disconnect_wait = EventMultiplexer::new([
            adapter.disconnected().clone(),
            self.close_requested.clone(),
        ]);
        disconnect_wait.wait(None);

        if self.close_requested.is_set() {
            Ok(SessionEnd::CloseRequested)
        } else {
            Ok(SessionEnd::Lost)
        }
    }

    fn run(&self) -> KeepAliveResult<()> {
        if self.close_requested.is_set() {
            return Ok(());
        }
        let available = self
            .lister
            .list_ports(self.options.only_available)
            .map_err(KeepAliveError::Enumeration)?;
        if !available.contains(&self.port) {
            // A close that raced the first listing wins over the absent port.
            if self.close_requested.is_set() {
                return Ok(());
            }
            return Err(KeepAliveError::PortUnavailable {
                port: self.port.clone(),
                available,
            });
        }

        loop {
            self.set_state(ConnectionState::WaitingForPort);
            if !self.wait_for_port()? {
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);
            debug!(port = %self.port, "Opening port");
            let transport = match self.factory.open(&self.port, &self.config) {
                Ok(transport) => transport,
                Err(e) if e.is_unavailable() => {
                    warn!(port = %self.port, error = %e, "Port listed but not openable, retrying");
                    if self.close_requested.wait(Some(self.options.poll_interval)) {
                        return Ok(());
                    }
                    continue;
                }
                Err(source) => {
                    return Err(KeepAliveError::Open {
                        port: self.port.clone(),
                        source,
                    })
                }
            };

            let adapter = Arc::new(ConnectionAdapter::new(self.sink.clone()));
            let mut reader = ReaderThread::spawn(transport, adapter.clone())?;
            *self.adapter.lock() = Some(adapter.clone());

            let session = self.monitor(&adapter);

            self.connected.clear();
            self.adapter.lock().take();
            reader.close();

            match session? {
                SessionEnd::CloseRequested => return Ok(()),
                SessionEnd::Lost => {
                    match adapter.last_error() {
                        Some(e) => warn!(port = %self.port, error = %e, "Connection lost, retrying"),
                        None => info!(port = %self.port, "Connection closed, retrying"),
                    }
                    self.set_state(ConnectionState::DisconnectedRetrying);
                }
            }
        }
    }

    /// Record how the worker ended and set `closed`.
    fn finish(&self, outcome: KeepAliveResult<()>) {
        self.adapter.lock().take();
        self.connected.clear();
        match outcome {
            Ok(()) => {
                self.set_state(ConnectionState::ClosedClean);
                info!(port = %self.port, "Connection manager closed");
            }
            Err(e) => {
                error!(port = %self.port, error = %e, "Connection manager failed");
                *self.last_error.lock() = Some(Arc::new(e));
                self.set_state(ConnectionState::ClosedError);
                self.error.set();
            }
        }
        self.closed.set();
    }

    fn active_adapter(&self, timeout: Option<Duration>) -> KeepAliveResult<Arc<ConnectionAdapter>> {
        let timeout = timeout.or(self.options.default_timeout);
        if !self.ready.wait(timeout) {
            return Err(KeepAliveError::NotConnected);
        }
        if !self.connected.is_set() {
            return Err(if self.closed.is_set() {
                KeepAliveError::Closed
            } else {
                KeepAliveError::NotConnected
            });
        }
        self.adapter
            .lock()
            .clone()
            .ok_or(KeepAliveError::NotConnected)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn worker_main(shared: Arc<Shared>) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| shared.run()))
        .unwrap_or_else(|payload| Err(KeepAliveError::WorkerPanicked(panic_message(payload))));
    shared.finish(outcome);
}

/// Keeps a serial connection alive across unplugs and device resets.
///
/// # Example
/// ```no_run
/// use serial_keepalive::{KeepAliveConnection, KeepAliveOptions, LineFramer, ResponseQueue};
/// use serial_keepalive::port::PortConfiguration;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let responses = ResponseQueue::new();
/// let framer = Arc::new(LineFramer::new("\n", responses.clone()));
/// let connection = KeepAliveConnection::new(
///     "/dev/ttyACM0",
///     PortConfiguration::with_baud_rate(115200),
///     KeepAliveOptions::default(),
///     framer,
/// );
///
/// let connection = connection.enter()?;
/// let reply = connection.request(&responses, b"*IDN?\n", Some(Duration::from_secs(1)), None)?;
/// println!("{}", String::from_utf8_lossy(&reply));
/// # Ok::<(), serial_keepalive::KeepAliveError>(())
/// ```
pub struct KeepAliveConnection {
    shared: Arc<Shared>,
    started: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl KeepAliveConnection {
    /// Manager for a port of the operating system.
    pub fn new(
        port: impl Into<String>,
        config: PortConfiguration,
        options: KeepAliveOptions,
        sink: Arc<dyn DataSink>,
    ) -> Self {
        Self::with_backend(
            port,
            config,
            options,
            sink,
            Arc::new(SystemSerial),
            Arc::new(SystemSerial),
        )
    }

    /// Manager that enumerates through `lister` and opens through `factory`.
    pub fn with_backend(
        port: impl Into<String>,
        config: PortConfiguration,
        options: KeepAliveOptions,
        sink: Arc<dyn DataSink>,
        lister: Arc<dyn PortLister>,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let connected = BinaryCondition::new("connected");
        let closed = BinaryCondition::new("closed");
        let ready = EventMultiplexer::new([connected.clone(), closed.clone()]);

        Self {
            shared: Arc::new(Shared {
                port: port.into(),
                config,
                options,
                lister,
                factory,
                sink,
                connected,
                close_requested: BinaryCondition::new("close_requested"),
                closed,
                error: BinaryCondition::new("error"),
                has_connected_once: BinaryCondition::new("has_connected_once"),
                ready,
                state: Mutex::new(ConnectionState::WaitingForPort),
                adapter: Mutex::new(None),
                last_error: Mutex::new(None),
                connect_count: AtomicUsize::new(0),
            }),
            started: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the worker.
    ///
    /// Fails with [`KeepAliveError::AlreadyStarted`] on a second call and
    /// after `close()` on a manager that was never started.
    pub fn start(&self) -> KeepAliveResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(KeepAliveError::AlreadyStarted);
        }

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("keepalive {}", self.shared.port))
            .spawn(move || worker_main(shared));

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Err(source) => {
                let kind = source.kind();
                let message = source.to_string();
                self.shared.finish(Err(KeepAliveError::Spawn {
                    what: "worker",
                    source,
                }));
                Err(KeepAliveError::Spawn {
                    what: "worker",
                    source: std::io::Error::new(kind, message),
                })
            }
        }
    }

    /// Write `data` once a connection exists.
    ///
    /// Waits up to `timeout` (`None` uses the default timeout) for the
    /// connection. Fails with [`KeepAliveError::NotConnected`] if none came
    /// up in time and with [`KeepAliveError::Closed`] once the manager has
    /// shut down. The write itself is not retried.
    pub fn write(&self, data: &[u8], timeout: Option<Duration>) -> KeepAliveResult<usize> {
        let adapter = self.shared.active_adapter(timeout)?;
        adapter.write(data)
    }

    /// Write `payload` and pop one response off `responses`.
    ///
    /// `timeout` bounds both the wait for the connection and the wait for the
    /// response. `poll_mode` defaults to the configured one.
    pub fn request<T>(
        &self,
        responses: &ResponseQueue<T>,
        payload: &[u8],
        timeout: Option<Duration>,
        poll_mode: Option<PollMode>,
    ) -> KeepAliveResult<T> {
        let timeout = timeout.or(self.shared.options.default_timeout);
        let adapter = self.shared.active_adapter(timeout)?;
        let mode = poll_mode.unwrap_or(self.shared.options.poll_mode);
        request::request(&*adapter, responses, payload, timeout, mode)
    }

    /// Ask the worker to stop. Returns immediately; wait on
    /// [`closed`](Self::closed) for the shutdown to complete. Idempotent.
    pub fn close(&self) {
        if !self.shared.close_requested.is_set() {
            info!(port = %self.shared.port, "Close requested");
        }
        self.shared.close_requested.set();

        // Nothing will ever set `closed` for a worker that never ran.
        if !self.started.swap(true, Ordering::SeqCst) {
            self.shared.finish(Ok(()));
        }
    }

    /// Block until the worker has exited. `false` if `timeout` elapsed first.
    pub fn wait_closed(&self, timeout: Option<Duration>) -> bool {
        self.shared.closed.wait(timeout)
    }

    /// Start, then block until connected or closed.
    ///
    /// If the manager closes instead (or the default timeout elapses), it is
    /// shut down and [`KeepAliveError::ConnectionFailed`] is returned, carrying
    /// the worker's error if there was one. The returned guard closes the
    /// connection and waits for the worker when it goes out of scope.
    pub fn enter(self) -> KeepAliveResult<ScopedConnection> {
        match self.start() {
            Ok(()) | Err(KeepAliveError::AlreadyStarted) => {}
            Err(e) => return Err(e),
        }

        self.shared.ready.wait(self.shared.options.default_timeout);
        if !self.shared.connected.is_set() {
            self.close();
            self.shared.closed.wait(None);
            return Err(KeepAliveError::ConnectionFailed {
                cause: self.last_error(),
            });
        }
        Ok(ScopedConnection { inner: self })
    }

    /// Snapshot of the current state.
    pub fn status(&self) -> ConnectionStatus {
        let shared = &self.shared;
        ConnectionStatus {
            port: shared.port.clone(),
            state: self.state(),
            connected: shared.connected.is_set(),
            has_connected_once: shared.has_connected_once.is_set(),
            connect_count: self.connect_count(),
            baud_rate: shared.config.baud_rate,
            data_bits: shared.config.data_bits,
            parity: shared.config.parity,
            stop_bits: shared.config.stop_bits,
            flow_control: shared.config.flow_control,
            error: self.last_error().map(|e| e.to_string()),
        }
    }

    /// True until the worker has exited.
    pub fn alive(&self) -> bool {
        !self.shared.closed.is_set()
    }

    pub fn port(&self) -> &str {
        &self.shared.port
    }

    pub fn config(&self) -> &PortConfiguration {
        &self.shared.config
    }

    pub fn options(&self) -> &KeepAliveOptions {
        &self.shared.options
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Number of sessions that reached `CONNECTED`.
    pub fn connect_count(&self) -> usize {
        self.shared.connect_count.load(Ordering::SeqCst)
    }

    /// Cause of a `CLOSED_ERROR` shutdown.
    pub fn last_error(&self) -> Option<Arc<KeepAliveError>> {
        self.shared.last_error.lock().clone()
    }

    /// Set while a connection is up.
    pub fn connected(&self) -> &BinaryCondition {
        &self.shared.connected
    }

    /// Set by `close()`; never cleared.
    pub fn close_requested(&self) -> &BinaryCondition {
        &self.shared.close_requested
    }

    /// Set exactly once, when the worker exits.
    pub fn closed(&self) -> &BinaryCondition {
        &self.shared.closed
    }

    /// Set when the worker exits with an error.
    pub fn error(&self) -> &BinaryCondition {
        &self.shared.error
    }

    /// Set by the first successful connection; never cleared.
    pub fn has_connected_once(&self) -> &BinaryCondition {
        &self.shared.has_connected_once
    }

    fn join_worker(&self) {
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!(port = %self.shared.port, "Worker thread panicked outside the catch boundary");
            }
        }
    }
}

impl Drop for KeepAliveConnection {
    fn drop(&mut self) {
        self.close();
        self.join_worker();
    }
}

impl std::fmt::Debug for KeepAliveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepAliveConnection")
            .field("port", &self.shared.port)
            .field("state", &self.state())
            .field("connected", &self.shared.connected.is_set())
            .finish()
    }
}

/// A connected [`KeepAliveConnection`] that closes itself on drop.
///
/// Dropping blocks until the worker has released the port.
#[derive(Debug)]
pub struct ScopedConnection {
    inner: KeepAliveConnection,
}

impl std::ops::Deref for ScopedConnection {
    type Target = KeepAliveConnection;

    fn deref(&self) -> &KeepAliveConnection {
        &self.inner
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        self.inner.close();
        self.inner.shared.closed.wait(None);
    }
}
