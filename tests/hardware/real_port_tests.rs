//! Tests requiring actual serial hardware.
//!
//! These tests are skipped if no hardware is available.
//!
//! # Running Hardware Tests
//!
//! ```bash
//! # Set environment variables
//! export TEST_PORT=COM3                  # or /dev/ttyUSB0 on Linux
//! export TEST_BAUD=9600                  # optional, default: 9600
//! export TEST_LOOPBACK=1                 # if port has TX-RX loopback
//!
//! # Run tests
//! cargo test -- --ignored
//! ```

use super::utils::skip_without_hardware;
use serial_keepalive::{
    ConnectionState, DiscardSink, KeepAliveConnection, KeepAliveOptions, LineFramer,
    ResponseQueue,
};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

#[test]
#[ignore] // Run with --ignored flag
fn test_real_port_connect_and_close() {
    let Some(test) = skip_without_hardware() else {
        return;
    };
    println!("Testing port: {} at {} baud", test.port_name, test.baud_rate);

    let connection = KeepAliveConnection::new(
        test.port_name.as_str(),
        test.to_port_config(),
        KeepAliveOptions::default(),
        Arc::new(DiscardSink),
    );
    connection.start().expect("Failed to start worker");
    assert!(connection.connected().wait(WAIT), "Port never connected");
    println!("✅ Connected: {:?}", connection.status());

    connection.close();
    assert!(connection.wait_closed(WAIT));
    assert_eq!(connection.state(), ConnectionState::ClosedClean);
    println!("✅ Connect/close test passed");
}

#[test]
#[ignore]
fn test_real_port_loopback_request() {
    let Some(test) = skip_without_hardware() else {
        return;
    };
    if !test.loopback_enabled {
        println!("⏭️  Skipping loopback test: TEST_LOOPBACK not set to 1");
        return;
    }

    let responses = ResponseQueue::new();
    let framer = Arc::new(LineFramer::new("\r\n", responses.clone()));
    let connection = KeepAliveConnection::new(
        test.port_name.as_str(),
        test.to_port_config(),
        KeepAliveOptions::default(),
        framer,
    )
    .enter()
    .expect("Connection could not be established");

    let reply = connection
        .request(&responses, b"LOOPBACK TEST\r\n", Some(Duration::from_secs(2)), None)
        .expect("No loopback reply");
    assert_eq!(reply, b"LOOPBACK TEST".to_vec());
    println!("✅ Loopback test passed");
}
