//! Blocking synchronization primitives used by the connection manager.
//!
//! - [`BinaryCondition`]: a flag threads can set, clear and wait on.
//! - [`EventMultiplexer`]: a derived flag that is set while any of its
//!   sources is set, so one thread can wait on several conditions at once.

pub mod condition;
pub mod multiplexer;

pub use condition::{BinaryCondition, ConditionObserver};
pub use multiplexer::EventMultiplexer;
