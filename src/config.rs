//! # Configuration Module
//!
//! Loads the logger settings (adapter link, tick timing, storage, query service,
//! logging switch) from TOML and checks every value against its valid range.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{LoggerError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub obd: ObdConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub economy: EconomyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub position: PositionConfig,
}

/// OBD-II adapter serial link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ObdConfig {
    /// Device path; empty means auto-detect
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

/// Acquisition loop timing
#[derive(Debug, Deserialize, Clone)]
pub struct AcquisitionConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_calibration_poll_ms")]
    pub calibration_poll_ms: u64,
}

/// Fuel economy accumulator behaviour
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EconomyConfig {
    /// Reset the running averages whenever a new drive file is opened
    #[serde(default)]
    pub reset_per_drive: bool,
}

/// Log tree storage configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: String,

    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

/// Query service configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// Which physical input drives the logging-enabled flag
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlInputKind {
    Gpio,
    AlwaysOn,
    Disabled,
}

/// Logging switch configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    #[serde(default = "default_control_input")]
    pub input: ControlInputKind,

    #[serde(default)]
    pub gpio_value_path: String,

    #[serde(default = "default_active_low")]
    pub active_low: bool,

    #[serde(default = "default_control_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Diagnostic logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rolling diagnostic logs; empty means stderr only
    #[serde(default)]
    pub dir: String,
}

/// Position receiver selection
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PositionSource {
    None,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PositionConfig {
    #[serde(default = "default_position_source")]
    pub source: PositionSource,
}

// Default value functions
fn default_baud_rate() -> u32 { 9600 }
fn default_timeout_ms() -> u64 { 500 }
fn default_reconnect_interval_ms() -> u64 { 5000 }

fn default_tick_interval_ms() -> u64 { 1000 }
fn default_calibration_poll_ms() -> u64 { 1000 }

fn default_storage_root() -> String { "./drives".to_string() }
fn default_lock_timeout_ms() -> u64 { 1000 }

fn default_bind() -> String { "0.0.0.0:8080".to_string() }

fn default_control_input() -> ControlInputKind { ControlInputKind::AlwaysOn }
fn default_active_low() -> bool { true }
fn default_control_poll_interval_ms() -> u64 { 10 }

fn default_log_level() -> String { "info".to_string() }

fn default_position_source() -> PositionSource { PositionSource::None }

impl Default for ObdConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            calibration_poll_ms: default_calibration_poll_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            input: default_control_input(),
            gpio_value_path: String::new(),
            active_low: default_active_low(),
            poll_interval_ms: default_control_poll_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: String::new(),
        }
    }
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self { source: default_position_source() }
    }
}

impl ObdConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl AcquisitionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn calibration_poll(&self) -> Duration {
        Duration::from_millis(self.calibration_poll_ms)
    }
}

impl StorageConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl ControlConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn invalid(msg: impl std::fmt::Display) -> LoggerError {
    LoggerError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use drive_logger::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed listen address of the query service
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .map_err(|e| invalid(format!("server bind '{}' is not a socket address: {}", self.server.bind, e)))
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if ![9600, 38400, 115200, 230400, 500000].contains(&self.obd.baud_rate) {
            return Err(invalid("baud_rate must be one of: 9600, 38400, 115200, 230400, 500000"));
        }

        if self.obd.timeout_ms == 0 || self.obd.timeout_ms > 10000 {
            return Err(invalid("timeout_ms must be between 1 and 10000"));
        }

        if self.obd.reconnect_interval_ms == 0 || self.obd.reconnect_interval_ms > 60000 {
            return Err(invalid("reconnect_interval_ms must be between 1 and 60000"));
        }

        if self.acquisition.tick_interval_ms < 100 || self.acquisition.tick_interval_ms > 60000 {
            return Err(invalid("tick_interval_ms must be between 100 and 60000"));
        }

        if self.acquisition.calibration_poll_ms < 100 || self.acquisition.calibration_poll_ms > 10000 {
            return Err(invalid("calibration_poll_ms must be between 100 and 10000"));
        }

        if self.storage.root.is_empty() {
            return Err(invalid("storage root cannot be empty"));
        }

        if self.storage.lock_timeout_ms == 0 || self.storage.lock_timeout_ms > 10000 {
            return Err(invalid("lock_timeout_ms must be between 1 and 10000"));
        }

        self.bind_addr()?;

        if self.control.input == ControlInputKind::Gpio && self.control.gpio_value_path.is_empty() {
            return Err(invalid("gpio_value_path cannot be empty when control input is 'gpio'"));
        }

        if self.control.poll_interval_ms == 0 || self.control.poll_interval_ms > 1000 {
            return Err(invalid("poll_interval_ms must be between 1 and 1000"));
        }

        if self.logging.level.is_empty() {
            return Err(invalid("logging level cannot be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_config() -> Config {
        Config {
            obd: ObdConfig::default(),
            acquisition: AcquisitionConfig::default(),
            economy: EconomyConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            control: ControlConfig::default(),
            logging: LoggingConfig::default(),
            position: PositionConfig::default(),
        }
    }

    #[test]
    fn test_default_config() {
        assert!(create_valid_config().validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.obd.baud_rate, 9600);
        assert_eq!(config.acquisition.tick_interval_ms, 1000);
        assert_eq!(config.storage.root, "./drives");
        assert_eq!(config.control.input, ControlInputKind::AlwaysOn);
        assert!(!config.economy.reset_per_drive);
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[obd]
port = "/dev/rfcomm0"
baud_rate = 38400

[economy]
reset_per_drive = true

[storage]
root = "/mnt/sd"

[control]
input = "gpio"
gpio_value_path = "/sys/class/gpio/gpio17/value"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.obd.port, "/dev/rfcomm0");
        assert_eq!(config.obd.baud_rate, 38400);
        assert!(config.economy.reset_per_drive);
        assert_eq!(config.storage.root, "/mnt/sd");
        assert_eq!(config.control.input, ControlInputKind::Gpio);
        assert!(config.control.active_low);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/drive-logger.toml");
        assert!(matches!(result, Err(LoggerError::Io(_))));
    }

    #[test]
    fn test_unknown_control_input() {
        let result = Config::from_toml("[control]\ninput = \"joystick\"\n");
        assert!(matches!(result, Err(LoggerError::Config(_))));
    }

    #[test]
    fn test_invalid_baud_rate() {
        let mut config = create_valid_config();
        config.obd.baud_rate = 420000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_baud_rates() {
        for &baud in &[9600, 38400, 115200, 230400, 500000] {
            let mut config = create_valid_config();
            config.obd.baud_rate = baud;
            assert!(config.validate().is_ok(), "Baud rate {} should be valid", baud);
        }
    }

    #[test]
    fn test_timeout_ms_bounds() {
        let mut config = create_valid_config();
        config.obd.timeout_ms = 0;
        assert!(config.validate().is_err());
        config.obd.timeout_ms = 10001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconnect_interval_zero() {
        let mut config = create_valid_config();
        config.obd.reconnect_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tick_interval_too_short() {
        let mut config = create_valid_config();
        config.acquisition.tick_interval_ms = 99;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_calibration_poll_too_long() {
        let mut config = create_valid_config();
        config.acquisition.calibration_poll_ms = 10001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_storage_root() {
        let mut config = create_valid_config();
        config.storage.root = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lock_timeout_zero() {
        let mut config = create_valid_config();
        config.storage.lock_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_bind_address() {
        let mut config = create_valid_config();
        config.server.bind = "localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gpio_without_path() {
        let mut config = create_valid_config();
        config.control.input = ControlInputKind::Gpio;
        assert!(config.validate().is_err());

        config.control.gpio_value_path = "/sys/class/gpio/gpio17/value".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_control_poll_interval_bounds() {
        let mut config = create_valid_config();
        config.control.poll_interval_ms = 0;
        assert!(config.validate().is_err());
        config.control.poll_interval_ms = 1001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_helpers() {
        let config = create_valid_config();
        assert_eq!(config.obd.timeout(), Duration::from_millis(500));
        assert_eq!(config.acquisition.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.storage.lock_timeout(), Duration::from_secs(1));
        assert_eq!(config.control.poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_baud_rate(), 9600);
        assert_eq!(default_timeout_ms(), 500);
        assert_eq!(default_reconnect_interval_ms(), 5000);
        assert_eq!(default_tick_interval_ms(), 1000);
        assert_eq!(default_calibration_poll_ms(), 1000);
        assert_eq!(default_storage_root(), "./drives");
        assert_eq!(default_lock_timeout_ms(), 1000);
        assert_eq!(default_bind(), "0.0.0.0:8080");
        assert!(default_active_low());
        assert_eq!(default_control_poll_interval_ms(), 10);
        assert_eq!(default_log_level(), "info");
    }
}
