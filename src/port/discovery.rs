//! Serial port discovery.
//!
//! Builds a metadata table from what the OS reports, filters it by USB
//! vendor/product id and descriptor, and probes whether a port accepts a
//! connection.

use super::error::PortError;
use serde::{Deserialize, Serialize};
use serialport::{SerialPortInfo, SerialPortType};
use std::time::Duration;
use tracing::debug;

/// One row of the port table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// System name, e.g. `COM4` or `/dev/ttyACM0`.
    pub port: String,
    /// Product description, if any.
    pub description: Option<String>,
    /// Hardware id string in the `USB VID:PID=xxxx:yyyy SER=...` shape.
    pub hardware_id: Option<String>,
    pub manufacturer: Option<String>,
    /// USB vendor id, upper-case hex.
    pub vid: Option<String>,
    /// USB product id, upper-case hex.
    pub pid: Option<String>,
}

impl PortInfo {
    fn from_system(info: &SerialPortInfo) -> Self {
        match &info.port_type {
            SerialPortType::UsbPort(usb) => {
                let mut hardware_id = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);
                if let Some(serial) = &usb.serial_number {
                    hardware_id.push_str(" SER=");
                    hardware_id.push_str(serial);
                }
                Self {
                    port: info.port_name.clone(),
                    description: usb.product.clone(),
                    hardware_id: Some(hardware_id),
                    manufacturer: usb.manufacturer.clone(),
                    vid: Some(format!("{:04X}", usb.vid)),
                    pid: Some(format!("{:04X}", usb.pid)),
                }
            }
            other => Self {
                port: info.port_name.clone(),
                description: Some(
                    match other {
                        SerialPortType::BluetoothPort => "Bluetooth",
                        SerialPortType::PciPort => "PCI",
                        _ => "Unknown",
                    }
                    .to_string(),
                ),
                hardware_id: None,
                manufacturer: None,
                vid: None,
                pid: None,
            },
        }
    }

    /// `vid:pid` in lower case, if both are known.
    pub fn vid_pid(&self) -> Option<String> {
        match (&self.vid, &self.pid) {
            (Some(vid), Some(pid)) => Some(format!("{vid}:{pid}").to_lowercase()),
            _ => None,
        }
    }
}

/// Selects rows of the port table.
///
/// Matching is case-insensitive. Skip lists match by substring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortFilter {
    /// Keep only ports whose `vid:pid` is listed, e.g. `2341:0043`.
    pub vid_pid: Vec<String>,
    /// Keep every USB port but sort the `vid_pid` matches first.
    pub include_all: bool,
    pub skip_vid: Vec<String>,
    pub skip_pid: Vec<String>,
    pub skip_descriptor: Vec<String>,
    pub skip_manufacturer: Vec<String>,
}

impl PortFilter {
    fn skipped(&self, info: &PortInfo) -> bool {
        fn hit(list: &[String], value: &Option<String>) -> bool {
            let Some(value) = value else { return false };
            let value = value.to_lowercase();
            list.iter().any(|s| value.contains(&s.to_lowercase()))
        }
        hit(&self.skip_vid, &info.vid)
            || hit(&self.skip_pid, &info.pid)
            || hit(&self.skip_descriptor, &info.description)
            || hit(&self.skip_manufacturer, &info.manufacturer)
    }

    fn selected(&self, info: &PortInfo) -> bool {
        if self.vid_pid.is_empty() {
            return true;
        }
        info.vid_pid()
            .map(|vp| self.vid_pid.iter().any(|want| want.to_lowercase() == vp))
            .unwrap_or(false)
    }

    /// Apply the filter. Ports without a USB vendor/product id are dropped.
    pub fn apply(&self, table: Vec<PortInfo>) -> Vec<PortInfo> {
        let rows = table
            .into_iter()
            .filter(|info| info.vid_pid().is_some())
            .filter(|info| !self.skipped(info));

        if self.include_all {
            let (mut matched, rest): (Vec<_>, Vec<_>) = rows.partition(|info| self.selected(info));
            matched.extend(rest);
            matched
        } else {
            rows.filter(|info| self.selected(info)).collect()
        }
    }
}

/// All ports the OS reports, with metadata.
pub fn port_table() -> Result<Vec<PortInfo>, PortError> {
    let ports = serialport::available_ports()?;
    Ok(ports.iter().map(PortInfo::from_system).collect())
}

/// Whether `port_name` accepts a connection right now.
///
/// A port that is already open elsewhere usually does not.
pub fn probe_port(port_name: &str, baud_rate: Option<u32>) -> bool {
    match serialport::new(port_name, baud_rate.unwrap_or(9600))
        .timeout(Duration::from_millis(50))
        .open()
    {
        Ok(_) => true,
        Err(e) => {
            debug!(port = %port_name, error = %e, "Port probe failed");
            false
        }
    }
}

/// Whether a port name looks like a USB/ACM serial device.
///
/// Windows reports every COM port; elsewhere only USB and ACM device nodes
/// are considered, which leaves out legacy on-board UARTs.
pub fn is_candidate_port(port_name: &str) -> bool {
    if cfg!(windows) {
        return true;
    }
    let lower = port_name.to_lowercase();
    lower.contains("usb") || lower.contains("acm")
}

/// Names of the visible serial ports, in OS order.
///
/// With `only_available`, each candidate is probed and ports refusing a
/// connection are left out.
pub fn list_ports(only_available: bool) -> Result<Vec<String>, PortError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| p.port_name)
        .filter(|name| is_candidate_port(name))
        .filter(|name| !only_available || probe_port(name, None))
        .collect())
}

/// First visible port, in name order, for which `test(port, baud_rate)` holds.
///
/// Sleeps `delay` after every failed test so devices that reset on open get
/// a moment before the next port is tried.
pub fn find_port<F>(baud_rate: u32, delay: Duration, test: F) -> Result<String, PortError>
where
    F: Fn(&str, u32) -> bool,
{
    let mut ports = list_ports(false)?;
    ports.sort();
    find_port_among(ports, baud_rate, delay, test)
}

/// [`find_port`] over an explicit list of candidates.
pub fn find_port_among<I, F>(
    candidates: I,
    baud_rate: u32,
    delay: Duration,
    test: F,
) -> Result<String, PortError>
where
    I: IntoIterator<Item = String>,
    F: Fn(&str, u32) -> bool,
{
    let mut tried = Vec::new();
    for port in candidates {
        if test(&port, baud_rate) {
            debug!(port = %port, baud_rate, "Port passed connection test");
            return Ok(port);
        }
        tried.push(port);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
    Err(PortError::NoMatch(tried))
}
