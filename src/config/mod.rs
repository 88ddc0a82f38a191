//! Configuration module for serial-keepalive.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_KEEPALIVE_CONFIG` environment variable (explicit path)
//! 2. `./serial-keepalive.toml` (current directory)
//! 3. `~/.config/serial-keepalive/config.toml` (XDG on Linux/macOS)
//! 4. `%APPDATA%\serial-keepalive\config.toml` (Windows)
//! 5. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is: `SERIAL_KEEPALIVE_<SECTION>_<KEY>`
//!
//! Examples:
//! - `SERIAL_KEEPALIVE_CONNECTION_PORT=/dev/ttyACM0`
//! - `SERIAL_KEEPALIVE_CONNECTION_BAUD_RATE=115200`
//! - `SERIAL_KEEPALIVE_KEEPALIVE_CONNECT_TIMEOUT_MS=5000`
//! - `SERIAL_KEEPALIVE_KEEPALIVE_RESPONSE_WAIT=polling`
//! - `SERIAL_KEEPALIVE_LOGGING_LEVEL=debug`
//!
//! # Example
//!
//! ```rust,no_run
//! use serial_keepalive::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//!
//! println!("Port: {:?}", config.connection.port);
//! println!("Baud: {}", config.connection.baud_rate);
//! # Ok::<(), serial_keepalive::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{get_default_config_path, resolve_config_path, ConfigLoader};
pub use schema::{
    Config, ConnectionConfig, KeepAliveConfig, LogFormat, LoggingConfig, ResponseWait,
};
