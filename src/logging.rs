//! Tracing initialisation.
//!
//! Logs always go to stderr so that stdout stays free for command output.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `RUST_LOG` if set and valid, else the configured level, else `info`.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Fails if one is already installed, so tests may call this freely and
/// ignore the result.
pub fn init(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter = env_filter(config);
    let registry = tracing_subscriber::registry();

    match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_filter(filter),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(config.ansi)
                    .with_writer(std::io::stderr)
                    .with_filter(filter),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(config.ansi)
                    .with_thread_names(true)
                    .with_writer(std::io::stderr)
                    .with_filter(filter),
            )
            .try_init(),
    }
}

/// [`init`], writing a warning to `warnings` instead of failing when a
/// subscriber is already installed. Returns whether this call installed one.
pub fn init_or_warn<W: std::io::Write>(config: &LoggingConfig, warnings: &mut W) -> bool {
    match init(config) {
        Ok(()) => true,
        Err(e) => {
            let _ = writeln!(warnings, "Warning: logging not initialised: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_configured_level_used_without_rust_log() {
        let saved = std::env::var("RUST_LOG").ok();
        std::env::remove_var("RUST_LOG");

        let config = LoggingConfig {
            level: "serial_keepalive=debug".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(env_filter(&config).to_string(), "serial_keepalive=debug");

        let broken = LoggingConfig {
            level: "serial_keepalive=verbose".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(env_filter(&broken).to_string(), "info");

        if let Some(value) = saved {
            std::env::set_var("RUST_LOG", value);
        }
    }

    #[test]
    #[serial]
    fn test_second_init_fails_quietly() {
        let config = LoggingConfig {
            format: LogFormat::Compact,
            ansi: false,
            ..LoggingConfig::default()
        };
        let _ = init(&config);
        assert!(init(&config).is_err());
    }

    #[test]
    #[serial]
    fn test_init_or_warn_reports_existing_subscriber() {
        let config = LoggingConfig {
            format: LogFormat::Json,
            ..LoggingConfig::default()
        };
        let _ = init(&config);

        let mut warnings = Vec::new();
        assert!(!init_or_warn(&config, &mut warnings));
        let text = String::from_utf8(warnings).unwrap();
        assert!(text.starts_with("Warning: logging not initialised"), "{text}");
    }
}
