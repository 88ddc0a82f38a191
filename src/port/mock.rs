//! In-memory serial hardware for tests and demos.
//!
//! A [`MockBus`] is a set of simulated ports that can be plugged in,
//! unplugged, made busy or made to refuse opens. It implements both
//! [`PortLister`] and [`TransportFactory`], so a
//! [`KeepAliveConnection`](crate::KeepAliveConnection) can run against it
//! unchanged. Transports opened from the bus see a disconnect as soon as their
//! port is unplugged.

use super::error::PortError;
use super::traits::{PortConfiguration, PortLister, Transport, TransportFactory};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How a simulated device answers writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Say nothing.
    Silent,
    /// Send every write straight back.
    Echo,
    /// Send `data` back `delay` after every write.
    Fixed { data: Vec<u8>, delay: Duration },
}

#[derive(Debug)]
struct MockPortState {
    present: bool,
    busy: bool,
    refuse_open: Option<String>,
    settle_delay: Duration,
    generation: u64,
    reply: MockReply,
    /// Bytes travelling device → host.
    rx: VecDeque<u8>,
    /// Log of all writes host → device.
    write_log: Vec<Vec<u8>>,
    open_count: usize,
}

impl Default for MockPortState {
    fn default() -> Self {
        Self {
            present: false,
            busy: false,
            refuse_open: None,
            settle_delay: Duration::ZERO,
            generation: 0,
            reply: MockReply::Silent,
            rx: VecDeque::new(),
            write_log: Vec::new(),
            open_count: 0,
        }
    }
}

#[derive(Default)]
struct BusInner {
    ports: Mutex<BTreeMap<String, MockPortState>>,
    data_ready: Condvar,
    list_calls: AtomicUsize,
}

/// A simulated set of serial ports.
///
/// # Example
/// ```
/// use serial_keepalive::port::{MockBus, MockReply, PortConfiguration, PortLister, TransportFactory};
///
/// let bus = MockBus::new();
/// bus.plug("MOCK0");
/// bus.set_reply("MOCK0", MockReply::Echo);
/// assert_eq!(bus.list_ports(true).unwrap(), vec!["MOCK0".to_string()]);
///
/// let mut port = bus.open("MOCK0", &PortConfiguration::default()).unwrap();
/// port.write_bytes(b"ping").unwrap();
/// let mut buffer = [0u8; 8];
/// let n = port.read_bytes(&mut buffer).unwrap();
/// assert_eq!(&buffer[..n], b"ping");
/// ```
#[derive(Clone, Default)]
pub struct MockBus {
    inner: Arc<BusInner>,
}

impl MockBus {
    /// Create an empty bus with no ports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `name` visible. Plugging an already present port does nothing.
    pub fn plug(&self, name: &str) {
        let mut ports = self.inner.ports.lock();
        let port = ports.entry(name.to_string()).or_default();
        port.present = true;
    }

    /// Remove `name`; every transport open on it sees a disconnect.
    pub fn unplug(&self, name: &str) {
        let mut ports = self.inner.ports.lock();
        if let Some(port) = ports.get_mut(name) {
            port.present = false;
            port.generation += 1;
            port.rx.clear();
        }
        self.inner.data_ready.notify_all();
    }

    /// Mark a port as held by someone else: it stays visible but is left out
    /// of `list_ports(true)`.
    pub fn set_busy(&self, name: &str, busy: bool) {
        let mut ports = self.inner.ports.lock();
        ports.entry(name.to_string()).or_default().busy = busy;
    }

    /// Make every open of `name` fail with a configuration error.
    pub fn refuse_open(&self, name: &str, message: impl Into<String>) {
        let mut ports = self.inner.ports.lock();
        ports.entry(name.to_string()).or_default().refuse_open = Some(message.into());
    }

    /// Make transports opened from now on take `delay` to settle, as a board
    /// that resets when its port is opened would.
    pub fn set_settle_delay(&self, name: &str, delay: Duration) {
        let mut ports = self.inner.ports.lock();
        ports.entry(name.to_string()).or_default().settle_delay = delay;
    }

    /// Choose how the simulated device answers writes.
    pub fn set_reply(&self, name: &str, reply: MockReply) {
        let mut ports = self.inner.ports.lock();
        ports.entry(name.to_string()).or_default().reply = reply;
    }

    /// Push bytes from the device towards the host.
    pub fn inject(&self, name: &str, data: &[u8]) {
        let mut ports = self.inner.ports.lock();
        if let Some(port) = ports.get_mut(name) {
            if port.present {
                port.rx.extend(data);
            }
        }
        self.inner.data_ready.notify_all();
    }

    /// Every write the host made to `name`, in order.
    pub fn writes(&self, name: &str) -> Vec<Vec<u8>> {
        let ports = self.inner.ports.lock();
        ports
            .get(name)
            .map(|p| p.write_log.clone())
            .unwrap_or_default()
    }

    /// How many times `name` was opened successfully.
    pub fn open_count(&self, name: &str) -> usize {
        let ports = self.inner.ports.lock();
        ports.get(name).map(|p| p.open_count).unwrap_or(0)
    }

    /// How many times the port list was queried.
    pub fn list_calls(&self) -> usize {
        self.inner.list_calls.load(Ordering::SeqCst)
    }

    fn schedule_reply(&self, name: &str, data: Vec<u8>, delay: Duration) {
        let bus = self.clone();
        let name = name.to_string();
        thread::spawn(move || {
            thread::sleep(delay);
            bus.inject(&name, &data);
        });
    }
}

impl PortLister for MockBus {
    fn list_ports(&self, only_available: bool) -> Result<Vec<String>, PortError> {
        self.inner.list_calls.fetch_add(1, Ordering::SeqCst);
        let ports = self.inner.ports.lock();
        Ok(ports
            .iter()
            .filter(|(_, p)| p.present && !(only_available && p.busy))
            .map(|(name, _)| name.clone())
            .collect())
    }
}

impl TransportFactory for MockBus {
    fn open(
        &self,
        port_name: &str,
        config: &PortConfiguration,
    ) -> Result<Box<dyn Transport>, PortError> {
        config.validate()?;

        let mut ports = self.inner.ports.lock();
        let port = match ports.get_mut(port_name) {
            Some(port) if port.present => port,
            _ => return Err(PortError::not_found(port_name)),
        };
        if let Some(message) = &port.refuse_open {
            return Err(PortError::config(message.clone()));
        }
        port.open_count += 1;

        Ok(Box::new(MockTransport {
            bus: self.clone(),
            name: port_name.to_string(),
            generation: port.generation,
            timeout: config.timeout,
            settle_delay: port.settle_delay,
        }))
    }
}

impl std::fmt::Debug for MockBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ports = self.inner.ports.lock();
        f.debug_struct("MockBus")
            .field("ports", &ports.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One open handle on a simulated port.
pub struct MockTransport {
    bus: MockBus,
    name: String,
    generation: u64,
    timeout: Duration,
    settle_delay: Duration,
}

impl Transport for MockTransport {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let reply = {
            let mut ports = self.bus.inner.ports.lock();
            let port = match ports.get_mut(&self.name) {
                Some(port) if port.present && port.generation == self.generation => port,
                _ => return Err(PortError::disconnected(&self.name)),
            };
            port.write_log.push(data.to_vec());
            match &port.reply {
                MockReply::Silent => None,
                MockReply::Echo => {
                    port.rx.extend(data);
                    self.bus.inner.data_ready.notify_all();
                    None
                }
                MockReply::Fixed { data, delay } => Some((data.clone(), *delay)),
            }
        };

        if let Some((data, delay)) = reply {
            self.bus.schedule_reply(&self.name, data, delay);
        }
        Ok(data.len())
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let deadline = Instant::now() + self.timeout;
        let mut ports = self.bus.inner.ports.lock();
        loop {
            match ports.get_mut(&self.name) {
                Some(port) if port.present && port.generation == self.generation => {
                    if !port.rx.is_empty() {
                        let n = buffer.len().min(port.rx.len());
                        for (slot, byte) in buffer.iter_mut().zip(port.rx.drain(..n)) {
                            *slot = byte;
                        }
                        return Ok(n);
                    }
                }
                _ => return Err(PortError::disconnected(&self.name)),
            }
            if self
                .bus
                .inner
                .data_ready
                .wait_until(&mut ports, deadline)
                .timed_out()
            {
                return Err(PortError::timeout(self.timeout));
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn try_clone_transport(&self) -> Result<Box<dyn Transport>, PortError> {
        Ok(Box::new(MockTransport {
            bus: self.bus.clone(),
            name: self.name.clone(),
            generation: self.generation,
            timeout: self.timeout,
            settle_delay: Duration::ZERO,
        }))
    }

    fn settle(&mut self) -> Result<(), PortError> {
        let deadline = Instant::now() + self.settle_delay;
        let mut ports = self.bus.inner.ports.lock();
        loop {
            match ports.get(&self.name) {
                Some(port) if port.present && port.generation == self.generation => {}
                _ => return Err(PortError::disconnected(&self.name)),
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
            self.bus.inner.data_ready.wait_until(&mut ports, deadline);
        }
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("name", &self.name)
            .field("generation", &self.generation)
            .finish()
    }
}
