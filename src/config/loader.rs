//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_KEEPALIVE";

/// Config file name inside the config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Config file name in the current directory
const LOCAL_CONFIG_FILE_NAME: &str = "serial-keepalive.toml";

/// Application directory name
const APP_DIR: &str = "serial-keepalive";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_KEEPALIVE_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SERIAL_KEEPALIVE_CONFIG` environment variable (explicit path)
    /// 2. `./serial-keepalive.toml` (current directory)
    /// 3. `~/.config/serial-keepalive/config.toml` (XDG on Linux/macOS)
    /// 4. `%APPDATA%\serial-keepalive\config.toml` (Windows)
    /// 5. Built-in defaults (no file required)
    ///
    /// Environment variables can override any config file values.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = if let Some(ref path) = config_path {
            load_from_file(path)?
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config)?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    pub fn with_defaults() -> ConfigResult<Self> {
        let mut config = Config::default();
        apply_env_overrides(&mut config)?;

        Ok(Self {
            config_path: None,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a mutable reference to the configuration.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to a specific file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    // 1. Explicit environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Current directory
    let cwd_config = PathBuf::from(LOCAL_CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. XDG config directory (Linux/macOS) or APPDATA (Windows)
    get_default_config_path().filter(|path| path.exists())
}

/// Get the platform-specific config directory.
fn get_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

/// Get the default config file path for creating new config files.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE_NAME))
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io("read", path, e))?;

    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Save configuration to a file.
fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::io("create", parent, e))?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::io("write", path, e))
}

fn env_var(key: &str) -> Option<(String, String)> {
    let var = format!("{ENV_PREFIX}_{key}");
    std::env::var(&var).ok().map(|value| (var, value))
}

fn parse_env<T: FromStr>(var: &str, value: &str, what: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env(var, format!("Invalid {what}: `{value}`")))
}

/// Optional millisecond value; `none`/empty clears it.
fn parse_optional_ms(var: &str, value: &str) -> ConfigResult<Option<u64>> {
    match value.trim().to_lowercase().as_str() {
        "" | "none" => Ok(None),
        _ => parse_env(var, value, "milliseconds").map(Some),
    }
}

/// Resolve `\n`, `\r`, `\t` and `\\` written literally in an environment value.
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `SERIAL_KEEPALIVE_<SECTION>_<KEY>`
/// For example:
/// - `SERIAL_KEEPALIVE_CONNECTION_PORT=/dev/ttyACM0`
/// - `SERIAL_KEEPALIVE_CONNECTION_BAUD_RATE=115200`
/// - `SERIAL_KEEPALIVE_KEEPALIVE_RESPONSE_WAIT=polling`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Connection overrides
    if let Some((_, val)) = env_var("CONNECTION_PORT") {
        config.connection.port = Some(val);
    }
    if let Some((var, val)) = env_var("CONNECTION_BAUD_RATE") {
        config.connection.baud_rate = parse_env(&var, &val, "baud rate")?;
    }
    if let Some((var, val)) = env_var("CONNECTION_READ_TIMEOUT_MS") {
        config.connection.read_timeout_ms = parse_env(&var, &val, "timeout")?;
    }

    // Keep-alive overrides
    if let Some((var, val)) = env_var("KEEPALIVE_CONNECT_TIMEOUT_MS") {
        config.keepalive.connect_timeout_ms = parse_optional_ms(&var, &val)?;
    }
    if let Some((var, val)) = env_var("KEEPALIVE_POLL_INTERVAL_MS") {
        config.keepalive.poll_interval_ms = parse_env(&var, &val, "poll interval")?;
    }
    if let Some((var, val)) = env_var("KEEPALIVE_DEFAULT_TIMEOUT_MS") {
        config.keepalive.default_timeout_ms = parse_optional_ms(&var, &val)?;
    }
    if let Some((var, val)) = env_var("KEEPALIVE_ONLY_AVAILABLE") {
        config.keepalive.only_available = parse_env(&var, &val.to_lowercase(), "boolean")?;
    }
    if let Some((var, val)) = env_var("KEEPALIVE_RESPONSE_WAIT") {
        config.keepalive.response_wait =
            val.parse().map_err(|e: String| ConfigError::env(var, e))?;
    }
    if let Some((_, val)) = env_var("KEEPALIVE_TERMINATOR") {
        config.keepalive.terminator = unescape(&val);
    }

    // Logging overrides
    if let Some((_, val)) = env_var("LOGGING_LEVEL") {
        config.logging.level = val;
    }
    if let Some((var, val)) = env_var("LOGGING_FORMAT") {
        config.logging.format = match val.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => {
                return Err(ConfigError::env(
                    var,
                    "expected json, pretty or compact",
                ))
            }
        };
    }

    validate(config)
}

fn validate(config: &Config) -> ConfigResult<()> {
    if config.connection.baud_rate == 0 {
        return Err(ConfigError::invalid(
            "connection.baud_rate",
            "must be greater than zero",
        ));
    }
    if config.connection.read_timeout_ms == 0 {
        return Err(ConfigError::invalid(
            "connection.read_timeout_ms",
            "must be greater than zero",
        ));
    }
    if config.keepalive.poll_interval_ms == 0 {
        return Err(ConfigError::invalid(
            "keepalive.poll_interval_ms",
            "must be greater than zero",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ResponseWait;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_default_loader() {
        let loader = ConfigLoader::with_defaults().unwrap();
        assert_eq!(loader.config().connection.baud_rate, 9600);
        assert!(loader.config_path.is_none());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("SERIAL_KEEPALIVE_CONNECTION_BAUD_RATE", "115200");
        env::set_var("SERIAL_KEEPALIVE_CONNECTION_PORT", "COM7");
        env::set_var("SERIAL_KEEPALIVE_KEEPALIVE_RESPONSE_WAIT", "polling");
        env::set_var("SERIAL_KEEPALIVE_KEEPALIVE_CONNECT_TIMEOUT_MS", "3000");

        let loader = ConfigLoader::with_defaults().unwrap();
        let config = loader.config();
        assert_eq!(config.connection.baud_rate, 115200);
        assert_eq!(config.connection.port.as_deref(), Some("COM7"));
        assert_eq!(config.keepalive.response_wait, ResponseWait::Polling);
        assert_eq!(config.keepalive.connect_timeout_ms, Some(3000));

        // Clean up
        env::remove_var("SERIAL_KEEPALIVE_CONNECTION_BAUD_RATE");
        env::remove_var("SERIAL_KEEPALIVE_CONNECTION_PORT");
        env::remove_var("SERIAL_KEEPALIVE_KEEPALIVE_RESPONSE_WAIT");
        env::remove_var("SERIAL_KEEPALIVE_KEEPALIVE_CONNECT_TIMEOUT_MS");
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_is_reported() {
        env::set_var("SERIAL_KEEPALIVE_CONNECTION_BAUD_RATE", "fast");
        let result = ConfigLoader::with_defaults();
        env::remove_var("SERIAL_KEEPALIVE_CONNECTION_BAUD_RATE");

        match result {
            Err(ConfigError::Env { var, .. }) => {
                assert_eq!(var, "SERIAL_KEEPALIVE_CONNECTION_BAUD_RATE")
            }
            other => panic!("Expected env parse error, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_terminator_escapes() {
        env::set_var("SERIAL_KEEPALIVE_KEEPALIVE_TERMINATOR", r"\r\n");
        let loader = ConfigLoader::with_defaults().unwrap();
        env::remove_var("SERIAL_KEEPALIVE_KEEPALIVE_TERMINATOR");
        assert_eq!(loader.config().keepalive.terminator, "\r\n");
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r"a\tb\\"), "a\tb\\");
        assert_eq!(unescape("plain"), "plain");
        assert_eq!(unescape("trailing\\"), "trailing\\");
    }

    #[test]
    #[serial]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("serial-keepalive.toml");

        let mut loader = ConfigLoader::with_defaults().unwrap();
        loader.config_mut().connection.port = Some("/dev/ttyUSB1".to_string());
        loader.config_mut().keepalive.poll_interval_ms = 500;
        loader.save_to(&path).unwrap();

        let reloaded = ConfigLoader::load_from(&path).unwrap();
        assert_eq!(reloaded.config_path.as_deref(), Some(path.as_path()));
        assert_eq!(reloaded.config(), loader.config());
    }

    #[test]
    #[serial]
    fn test_explicit_path_env_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[connection]\nbaud_rate = 57600\n").unwrap();

        env::set_var(CONFIG_PATH_ENV, &path);
        let loader = ConfigLoader::load();
        env::remove_var(CONFIG_PATH_ENV);

        let loader = loader.unwrap();
        assert_eq!(loader.config_path.as_deref(), Some(path.as_path()));
        assert_eq!(loader.config().connection.baud_rate, 57600);
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::load_from("/nonexistent/serial-keepalive.toml");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_invalid_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[connection\nbaud_rate = ").unwrap();
        assert!(matches!(
            ConfigLoader::load_from(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    #[serial]
    fn test_zero_poll_interval_rejected() {
        env::set_var("SERIAL_KEEPALIVE_KEEPALIVE_POLL_INTERVAL_MS", "0");
        let result = ConfigLoader::with_defaults();
        env::remove_var("SERIAL_KEEPALIVE_KEEPALIVE_POLL_INTERVAL_MS");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key, .. }) if key == "keepalive.poll_interval_ms"
        ));
    }
}
