//! Port abstraction layer for serial communication.
//!
//! Provides the traits the connection manager is written against, the
//! `serialport`-backed implementation, port discovery, and an in-memory bus
//! for tests.

pub mod discovery;
pub mod error;
pub mod mock;
pub mod sync_port;
pub mod traits;

pub use discovery::{PortFilter, PortInfo};
pub use error::PortError;
pub use mock::{MockBus, MockReply, MockTransport};
pub use sync_port::{SyncSerialPort, SystemSerial};
pub use traits::*;
