//! Shared test utilities for the serial-keepalive integration tests.
//!
//! This module provides common test infrastructure including:
//! - Fast timing presets so reconnect cycles finish in milliseconds
//! - Connection builders on top of the in-memory `MockBus`
//! - Polling helpers for asserting on eventually-true conditions

#![allow(dead_code)]

use serial_keepalive::port::{MockBus, MockReply, PortConfiguration};
use serial_keepalive::{
    DataSink, DiscardSink, KeepAliveConnection, KeepAliveOptions, LineFramer, ResponseQueue,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Generous upper bound for anything that should happen "soon".
pub const WAIT: Option<Duration> = Some(Duration::from_secs(5));

/// Port name used by most tests.
pub const PORT: &str = "MOCK0";

/// Short read timeout so reader threads notice shutdown quickly.
pub fn fast_config() -> PortConfiguration {
    PortConfiguration {
        timeout: Duration::from_millis(20),
        ..PortConfiguration::default()
    }
}

/// Short poll interval so port reappearance is noticed quickly.
pub fn fast_options() -> KeepAliveOptions {
    KeepAliveOptions {
        poll_interval: Duration::from_millis(20),
        ..KeepAliveOptions::default()
    }
}

/// Manager for `port` on `bus` with the given sink and options.
pub fn connection_with(
    bus: &MockBus,
    port: &str,
    options: KeepAliveOptions,
    sink: Arc<dyn DataSink>,
) -> KeepAliveConnection {
    KeepAliveConnection::with_backend(
        port,
        fast_config(),
        options,
        sink,
        Arc::new(bus.clone()),
        Arc::new(bus.clone()),
    )
}

/// Manager for `port` on `bus` that discards inbound data.
pub fn connection(bus: &MockBus, port: &str) -> KeepAliveConnection {
    connection_with(bus, port, fast_options(), Arc::new(DiscardSink))
}

/// Manager whose inbound lines land in the returned queue.
pub fn line_connection(
    bus: &MockBus,
    port: &str,
) -> (KeepAliveConnection, ResponseQueue<Vec<u8>>) {
    let responses = ResponseQueue::new();
    let framer = Arc::new(LineFramer::new("\n", responses.clone()));
    (
        connection_with(bus, port, fast_options(), framer),
        responses,
    )
}

/// A bus with `port` plugged in and answering `reply` after `delay_ms`.
pub fn replying_bus(port: &str, reply: &[u8], delay_ms: u64) -> MockBus {
    let bus = MockBus::new();
    bus.plug(port);
    bus.set_reply(
        port,
        MockReply::Fixed {
            data: reply.to_vec(),
            delay: Duration::from_millis(delay_ms),
        },
    );
    bus
}

/// Poll `predicate` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    predicate()
}
