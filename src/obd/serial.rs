//! # OBD Adapter Serial Link
//!
//! Opens the serial connection to the ELM327-compatible adapter and keeps it
//! alive across unplug/replug cycles.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use super::client::{EngineReadings, EngineSource, ObdClient};
use crate::config::ObdConfig;
use crate::error::{LoggerError, Result};

/// Default adapter device paths to try (in order of preference)
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyUSB0",  // USB-to-serial adapters
    "/dev/ttyACM0",  // USB CDC adapters
    "/dev/rfcomm0",  // Bluetooth SPP adapters
];

/// Open the first adapter that answers on `paths`
///
/// # Errors
///
/// Returns `SerialPortNotFound` listing every path tried if none could be opened.
pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<(SerialStream, String)> {
    for path in paths {
        debug!("Trying to open serial port: {}", path);

        match open_port(path, baud_rate) {
            Ok(port) => {
                info!("Opened OBD adapter at {}", path);
                return Ok((port, path.to_string()));
            }
            Err(e) => {
                warn!("Failed to open {}: {}", path, e);
                continue;
            }
        }
    }

    Err(LoggerError::SerialPortNotFound(paths.join(", ")))
}

/// Open a specific serial port 8N1 without flow control
fn open_port(path: &str, baud_rate: u32) -> Result<SerialStream> {
    tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| LoggerError::Serial(format!("Failed to open {}: {}", path, e)))
}

/// Engine source that (re)opens the adapter lazily
///
/// While no adapter is connected every metric reads as absent; reconnection
/// is attempted at most once per `reconnect_interval`.
pub struct ReconnectingObd {
    paths: Vec<String>,
    baud_rate: u32,
    timeout: Duration,
    reconnect_interval: Duration,
    client: Option<ObdClient<SerialStream>>,
    device_path: Option<String>,
    last_attempt: Option<Instant>,
}

impl std::fmt::Debug for ReconnectingObd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingObd")
            .field("paths", &self.paths)
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl ReconnectingObd {
    pub fn new(config: &ObdConfig) -> Self {
        let paths = if config.port.is_empty() {
            DEFAULT_DEVICE_PATHS.iter().map(|p| p.to_string()).collect()
        } else {
            vec![config.port.clone()]
        };

        Self {
            paths,
            baud_rate: config.baud_rate,
            timeout: config.timeout(),
            reconnect_interval: config.reconnect_interval(),
            client: None,
            device_path: None,
            last_attempt: None,
        }
    }

    /// Path of the connected adapter, if any
    pub fn device_path(&self) -> Option<&str> {
        self.device_path.as_deref()
    }

    fn reconnect_due(&self) -> bool {
        self.last_attempt
            .map_or(true, |at| at.elapsed() >= self.reconnect_interval)
    }

    async fn connect(&mut self) {
        self.last_attempt = Some(Instant::now());

        let paths: Vec<&str> = self.paths.iter().map(String::as_str).collect();
        match open_with_paths(&paths, self.baud_rate) {
            Ok((port, path)) => {
                let mut client = ObdClient::new(port, self.timeout);
                if let Err(e) = client.initialize().await {
                    warn!("OBD adapter at {} did not initialise: {}", path, e);
                }
                self.client = Some(client);
                self.device_path = Some(path);
            }
            Err(e) => warn!("{}", e),
        }
    }
}

#[async_trait]
impl EngineSource for ReconnectingObd {
    async fn read_engine(&mut self) -> EngineReadings {
        if self.client.is_none() && self.reconnect_due() {
            self.connect().await;
        }

        let Some(client) = self.client.as_mut() else {
            return EngineReadings::default();
        };

        let readings = client.read_engine().await;
        if client.link_lost() {
            warn!("Lost OBD adapter at {}", self.device_path.as_deref().unwrap_or("?"));
            self.client = None;
            self.device_path = None;
        } else if readings == EngineReadings::default() {
            debug!("No engine data this tick");
        }
        readings
    }
}
