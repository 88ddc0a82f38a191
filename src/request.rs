//! Synchronous request/response on top of an asynchronously read port.
//!
//! The I/O thread pushes parsed responses into a [`ResponseQueue`] (usually
//! through a [`LineFramer`]); [`request`] writes a payload and pops exactly one
//! item back off the queue, either blocking on it or spinning on it according
//! to [`PollMode`].

use crate::adapter::{ConnectionAdapter, DataSink};
use crate::error::{KeepAliveError, KeepAliveResult};
use crate::port::Transport;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

struct QueueInner<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

/// Multi-producer, multi-consumer FIFO hand-off between the I/O thread and
/// request callers. Clones share the same queue.
pub struct ResponseQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for ResponseQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for ResponseQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResponseQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                items: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
            }),
        }
    }

    /// Append an item and wake one waiting consumer.
    pub fn push(&self, item: T) {
        self.inner.items.lock().push_back(item);
        self.inner.available.notify_one();
    }

    /// Take the oldest item, waiting up to `timeout` (`None` waits forever).
    pub fn pop(&self, timeout: Option<Duration>) -> Option<T> {
        let mut items = self.inner.items.lock();
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            match deadline {
                None => self.inner.available.wait(&mut items),
                Some(deadline) => {
                    if self
                        .inner
                        .available
                        .wait_until(&mut items, deadline)
                        .timed_out()
                    {
                        return items.pop_front();
                    }
                }
            }
        }
    }

    /// Take the oldest item if there is one.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.lock().is_empty()
    }

    /// Drop every queued item.
    pub fn clear(&self) {
        self.inner.items.lock().clear();
    }
}

impl<T> std::fmt::Debug for ResponseQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseQueue")
            .field("len", &self.len())
            .finish()
    }
}

/// How [`request`] waits for its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollMode {
    /// Sleep on the queue until an item arrives or the timeout elapses.
    Blocking,
    /// Spin on non-blocking pops. Burns a core, but reacts faster on hosts
    /// with slow thread wake-ups.
    Polling,
}

impl PollMode {
    /// Polling on Windows, blocking everywhere else.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            PollMode::Polling
        } else {
            PollMode::Blocking
        }
    }
}

impl Default for PollMode {
    fn default() -> Self {
        Self::platform_default()
    }
}

/// Something a request payload can be written to.
pub trait Transmit {
    fn transmit(&self, data: &[u8]) -> KeepAliveResult<usize>;
}

impl Transmit for ConnectionAdapter {
    fn transmit(&self, data: &[u8]) -> KeepAliveResult<usize> {
        self.write(data)
    }
}

impl Transmit for Mutex<Box<dyn Transport>> {
    fn transmit(&self, data: &[u8]) -> KeepAliveResult<usize> {
        Ok(self.lock().write_bytes(data)?)
    }
}

impl<T: Transmit + ?Sized> Transmit for Arc<T> {
    fn transmit(&self, data: &[u8]) -> KeepAliveResult<usize> {
        (**self).transmit(data)
    }
}

/// Write `payload` and wait for exactly one item on `responses`.
///
/// Returns the oldest queued item; anything queued behind it stays for the
/// next call. Fails with [`KeepAliveError::NoResponse`] when `timeout`
/// elapses first. A `None` timeout waits forever in either mode.
pub fn request<X, T>(
    transmit: &X,
    responses: &ResponseQueue<T>,
    payload: &[u8],
    timeout: Option<Duration>,
    mode: PollMode,
) -> KeepAliveResult<T>
where
    X: Transmit + ?Sized,
{
    transmit.transmit(payload)?;

    match mode {
        PollMode::Blocking => responses
            .pop(timeout)
            .ok_or(KeepAliveError::NoResponse(timeout)),
        PollMode::Polling => {
            let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
            loop {
                if let Some(item) = responses.try_pop() {
                    return Ok(item);
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    return Err(KeepAliveError::NoResponse(timeout));
                }
                std::hint::spin_loop();
            }
        }
    }
}

/// Sink that splits inbound bytes into frames ending with `terminator` and
/// queues each frame with the terminator stripped.
///
/// Bytes after the last terminator are held until the rest of the frame
/// arrives, up to `max_pending` bytes. Beyond that the oldest held bytes are
/// discarded.
pub struct LineFramer {
    terminator: Vec<u8>,
    pending: Mutex<Vec<u8>>,
    max_pending: usize,
    frames: ResponseQueue<Vec<u8>>,
}

impl LineFramer {
    /// Default bound on an unterminated frame.
    pub const DEFAULT_MAX_PENDING: usize = 64 * 1024;

    pub fn new(terminator: impl Into<Vec<u8>>, frames: ResponseQueue<Vec<u8>>) -> Self {
        Self {
            terminator: terminator.into(),
            pending: Mutex::new(Vec::new()),
            max_pending: Self::DEFAULT_MAX_PENDING,
            frames,
        }
    }

    /// Hold at most `limit` bytes of an unterminated frame.
    pub fn with_max_pending(mut self, limit: usize) -> Self {
        self.max_pending = limit;
        self
    }

    /// The queue complete frames are pushed into.
    pub fn frames(&self) -> &ResponseQueue<Vec<u8>> {
        &self.frames
    }

    /// Bytes of the incomplete trailing frame.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

impl DataSink for LineFramer {
    fn data_received(&self, data: &[u8]) {
        if self.terminator.is_empty() {
            self.frames.push(data.to_vec());
            return;
        }

        let mut pending = self.pending.lock();
        pending.extend_from_slice(data);
        let len = self.terminator.len();
        while let Some(pos) = pending.windows(len).position(|w| w == self.terminator) {
            let frame: Vec<u8> = pending.drain(..pos + len).take(pos).collect();
            self.frames.push(frame);
        }

        if pending.len() > self.max_pending {
            let excess = pending.len() - self.max_pending;
            pending.drain(..excess);
            warn!(
                discarded = excess,
                limit = self.max_pending,
                "Unterminated frame over limit, dropping oldest bytes"
            );
        }
    }
}

impl std::fmt::Debug for LineFramer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineFramer")
            .field("terminator", &String::from_utf8_lossy(&self.terminator))
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Answers every write with `reply` after `delay`, or never.
    struct DelayedEcho {
        queue: ResponseQueue<Vec<u8>>,
        reply: Option<(Vec<u8>, Duration)>,
        writes: Mutex<Vec<Vec<u8>>>,
    }

    impl Transmit for DelayedEcho {
        fn transmit(&self, data: &[u8]) -> KeepAliveResult<usize> {
            self.writes.lock().push(data.to_vec());
            if let Some((reply, delay)) = self.reply.clone() {
                let queue = self.queue.clone();
                thread::spawn(move || {
                    thread::sleep(delay);
                    queue.push(reply);
                });
            }
            Ok(data.len())
        }
    }

    fn device(reply: Option<(&[u8], u64)>) -> (DelayedEcho, ResponseQueue<Vec<u8>>) {
        let queue = ResponseQueue::new();
        let device = DelayedEcho {
            queue: queue.clone(),
            reply: reply.map(|(r, ms)| (r.to_vec(), Duration::from_millis(ms))),
            writes: Mutex::new(Vec::new()),
        };
        (device, queue)
    }

    #[test]
    fn test_blocking_request_gets_delayed_reply() {
        let (device, queue) = device(Some((b"OK", 50)));
        let reply = request(
            &device,
            &queue,
            b"PING",
            Some(Duration::from_secs(1)),
            PollMode::Blocking,
        )
        .unwrap();
        assert_eq!(reply, b"OK".to_vec());
        assert_eq!(*device.writes.lock(), vec![b"PING".to_vec()]);
    }

    #[test]
    fn test_polling_request_gets_delayed_reply() {
        let (device, queue) = device(Some((b"OK", 50)));
        let reply = request(
            &device,
            &queue,
            b"PING",
            Some(Duration::from_secs(1)),
            PollMode::Polling,
        )
        .unwrap();
        assert_eq!(reply, b"OK".to_vec());
    }

    #[test]
    fn test_silent_device_times_out_quickly() {
        for mode in [PollMode::Blocking, PollMode::Polling] {
            let (device, queue) = device(None);
            let start = Instant::now();
            let err = request(
                &device,
                &queue,
                b"PING",
                Some(Duration::from_millis(10)),
                mode,
            )
            .unwrap_err();
            let elapsed = start.elapsed();
            assert!(err.is_no_response(), "{mode:?}: {err}");
            assert!(elapsed >= Duration::from_millis(10), "{mode:?}: {elapsed:?}");
            assert!(elapsed < Duration::from_millis(500), "{mode:?}: {elapsed:?}");
        }
    }

    #[test]
    fn test_one_item_consumed_per_request() {
        for mode in [PollMode::Blocking, PollMode::Polling] {
            let (device, queue) = device(None);
            queue.push(b"first".to_vec());
            queue.push(b"second".to_vec());

            let reply = request(&device, &queue, b"?", Some(Duration::from_millis(10)), mode);
            assert_eq!(reply.unwrap(), b"first".to_vec());
            assert_eq!(queue.len(), 1);
            assert_eq!(queue.try_pop(), Some(b"second".to_vec()));
        }
    }

    #[test]
    fn test_timed_out_request_leaves_late_reply_queued() {
        let (device, queue) = device(Some((b"late", 40)));
        let err = request(
            &device,
            &queue,
            b"?",
            Some(Duration::from_millis(5)),
            PollMode::Blocking,
        )
        .unwrap_err();
        assert!(err.is_no_response());
        assert_eq!(queue.pop(Some(Duration::from_secs(2))), Some(b"late".to_vec()));
    }

    #[test]
    fn test_transmit_error_propagates() {
        let adapter = ConnectionAdapter::new(Arc::new(crate::adapter::DiscardSink));
        let queue: ResponseQueue<Vec<u8>> = ResponseQueue::new();
        let err = request(&adapter, &queue, b"x", None, PollMode::Polling).unwrap_err();
        assert!(matches!(err, KeepAliveError::NotConnected));
    }

    #[test]
    fn test_queue_fifo_across_threads() {
        let queue = ResponseQueue::new();
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            for i in 0..100u32 {
                producer.push(i);
            }
        });
        let received: Vec<u32> = (0..100)
            .map(|_| queue.pop(Some(Duration::from_secs(5))).unwrap())
            .collect();
        handle.join().unwrap();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_times_out_on_empty_queue() {
        let queue: ResponseQueue<u8> = ResponseQueue::new();
        assert_eq!(queue.pop(Some(Duration::from_millis(10))), None);
        queue.push(1);
        queue.clear();
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_line_framer_splits_and_buffers() {
        let framer = LineFramer::new("\r\n", ResponseQueue::new());
        framer.data_received(b"OK\r\nVAL");
        framer.data_received(b"UE=3\r");
        assert_eq!(framer.frames().try_pop(), Some(b"OK".to_vec()));
        assert!(framer.frames().is_empty());
        assert_eq!(framer.pending(), 8);

        framer.data_received(b"\n\r\n");
        assert_eq!(framer.frames().try_pop(), Some(b"VALUE=3".to_vec()));
        assert_eq!(framer.frames().try_pop(), Some(Vec::new()));
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_line_framer_bounds_unterminated_data() {
        let framer = LineFramer::new("\n", ResponseQueue::new()).with_max_pending(8);
        for _ in 0..100 {
            framer.data_received(b"noise-");
            assert!(framer.pending() <= 8);
        }

        framer.data_received(b"END\n");
        let frame = framer.frames().try_pop().unwrap();
        assert!(frame.ends_with(b"END"));
        assert!(frame.len() <= 8 + b"END".len());
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_request_over_locked_transport() {
        use crate::port::{MockBus, PortConfiguration, TransportFactory};

        let bus = MockBus::new();
        bus.plug("MOCK0");
        let transport: Mutex<Box<dyn Transport>> =
            Mutex::new(bus.open("MOCK0", &PortConfiguration::default()).unwrap());
        let responses = ResponseQueue::new();
        let replier = {
            let responses = responses.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                responses.push("READY");
            })
        };

        let reply = request(
            &transport,
            &responses,
            b"STATUS?\n",
            Some(Duration::from_secs(1)),
            PollMode::Blocking,
        )
        .unwrap();
        assert_eq!(reply, "READY");
        assert_eq!(bus.writes("MOCK0"), vec![b"STATUS?\n".to_vec()]);

        bus.unplug("MOCK0");
        assert!(matches!(
            transport.transmit(b"x"),
            Err(KeepAliveError::Transport(_))
        ));
        replier.join().unwrap();
    }

    #[test]
    fn test_line_framer_without_terminator_passes_chunks() {
        let framer = LineFramer::new(Vec::new(), ResponseQueue::new());
        framer.data_received(b"abc");
        assert_eq!(framer.frames().try_pop(), Some(b"abc".to_vec()));
    }

    #[test]
    fn test_poll_mode_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: PollMode,
        }
        let w: Wrapper = toml::from_str(r#"mode = "polling""#).unwrap();
        assert_eq!(w.mode, PollMode::Polling);
        if !cfg!(windows) {
            assert_eq!(PollMode::default(), PollMode::Blocking);
        }
    }
}
