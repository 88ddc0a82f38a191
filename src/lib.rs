//! Serial Keep-Alive Library
//!
//! Keeps a logical connection to a serial device usable while the physical
//! one comes and goes: cables get unplugged, devices reset, ports enumerate
//! late. A background worker reconnects; callers just `write` and `request`.
//!
//! # Modules
//!
//! - `event`: Binary conditions and the "any of N" multiplexer
//! - `port`: Port abstraction layer for serial communication
//! - `adapter`: Connection adapter turning transport events into conditions
//! - `reader`: The I/O thread behind one open port
//! - `request`: Response queue and request/response coordinator
//! - `keepalive`: The connection lifecycle manager
//! - `config`: Configuration management with TOML support
//! - `logging`: Tracing initialisation
//! - `error`: Unified error handling

pub mod adapter;
pub mod config;
pub mod error;
pub mod event;
pub mod keepalive;
pub mod logging;
pub mod port;
pub mod reader;
pub mod request;

// Re-export commonly used types for convenience
pub use adapter::{ConnectionAdapter, DataSink, DiscardSink};
pub use error::{KeepAliveError, KeepAliveResult};
pub use event::{BinaryCondition, ConditionObserver, EventMultiplexer};
pub use keepalive::{
    ConnectionState, ConnectionStatus, KeepAliveConnection, KeepAliveOptions, ScopedConnection,
};
pub use port::{
    DataBits, FlowControl, Parity, PortConfiguration, PortError, StopBits, SyncSerialPort,
    SystemSerial,
};
pub use reader::ReaderThread;
pub use request::{request, LineFramer, PollMode, ResponseQueue, Transmit};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
