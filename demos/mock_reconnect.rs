//! Keep-alive against a simulated port that gets unplugged mid-session.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example mock_reconnect
//! ```

use serial_keepalive::port::{MockBus, MockReply, PortConfiguration};
use serial_keepalive::{
    KeepAliveConnection, KeepAliveOptions, LineFramer, ResponseQueue,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("debug").init();

    let bus = MockBus::new();
    bus.plug("MOCK0");
    bus.set_reply("MOCK0", MockReply::Echo);

    let responses = ResponseQueue::new();
    let connection = KeepAliveConnection::with_backend(
        "MOCK0",
        PortConfiguration::default(),
        KeepAliveOptions {
            poll_interval: Duration::from_millis(200),
            ..KeepAliveOptions::default()
        },
        Arc::new(LineFramer::new("\n", responses.clone())),
        Arc::new(bus.clone()),
        Arc::new(bus.clone()),
    )
    .enter()?;

    let reply = connection.request(&responses, b"first\n", Some(Duration::from_secs(1)), None)?;
    println!("Reply: {}", String::from_utf8_lossy(&reply));

    println!("Unplugging MOCK0 for one second...");
    bus.unplug("MOCK0");
    let replug = {
        let bus = bus.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(1));
            bus.plug("MOCK0");
        })
    };

    // Blocks until the worker has reconnected.
    let reply = connection.request(&responses, b"second\n", Some(Duration::from_secs(5)), None)?;
    println!("Reply: {}", String::from_utf8_lossy(&reply));
    let _ = replug.join();

    println!("{}", serde_json::to_string_pretty(&connection.status())?);
    Ok(())
}
