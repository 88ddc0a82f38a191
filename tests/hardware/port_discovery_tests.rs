//! Port enumeration against the real system.
//!
//! # Running
//!
//! ```bash
//! export TEST_PORT=/dev/ttyACM0   # or COM3 on Windows
//! cargo test --test integration_hardware -- --ignored
//! ```

use super::utils::skip_without_hardware;
use serial_keepalive::port::discovery::{self, PortFilter};
use serial_keepalive::port::{PortLister, SystemSerial};

#[test]
#[ignore]
fn test_port_table_lists_test_port() {
    let Some(test) = skip_without_hardware() else {
        return;
    };

    let table = discovery::port_table().expect("Failed to read port table");
    for info in &table {
        println!(
            "  {} vid:pid={} {:?}",
            info.port,
            info.vid_pid().unwrap_or_else(|| "-".to_string()),
            info.description
        );
    }
    assert!(table.iter().any(|info| info.port == test.port_name));
}

#[test]
#[ignore]
fn test_system_lister_sees_test_port() {
    let Some(test) = skip_without_hardware() else {
        return;
    };

    let ports = SystemSerial.list_ports(false).expect("Failed to list ports");
    println!("Visible ports: {:?}", ports);
    assert!(ports.contains(&test.port_name));
}

#[test]
#[ignore]
fn test_vid_pid_filter_matches_itself() {
    let Some(test) = skip_without_hardware() else {
        return;
    };

    let table = discovery::port_table().expect("Failed to read port table");
    let Some(vid_pid) = table
        .iter()
        .find(|info| info.port == test.port_name)
        .and_then(|info| info.vid_pid())
    else {
        println!("⏭️  Skipping: test port is not a USB device");
        return;
    };

    let filter = PortFilter {
        vid_pid: vec![vid_pid],
        ..PortFilter::default()
    };
    let rows = filter.apply(table);
    assert!(rows.iter().any(|info| info.port == test.port_name));
}
