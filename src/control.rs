//! # Logging Control
//!
//! Samples the physical logging switch and publishes the logging-enabled flag.
//!
//! Until the position receiver is calibrated the flag is held false whatever
//! the switch says; after that it follows the switch level. The flag lives in a
//! `watch` cell whose only writer is this loop.
//!
//! A `watch` cell only keeps the latest value, so the flag carries an
//! activation count next to the level. A reader that was busy while the switch
//! went off and back on still sees the count move and starts a new drive.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::calibration::CalibrationState;
use crate::config::{ControlConfig, ControlInputKind};
use crate::error::{LoggerError, Result};

/// Logging-enabled level plus the number of off→on transitions so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggingFlag {
    pub enabled: bool,
    pub activation: u64,
}

impl LoggingFlag {
    /// Move to `enabled`, counting a new activation on a rising edge
    ///
    /// Returns whether the flag changed, for use with `send_if_modified`.
    pub fn set(&mut self, enabled: bool) -> bool {
        if self.enabled == enabled {
            return false;
        }
        self.enabled = enabled;
        if enabled {
            self.activation = self.activation.wrapping_add(1);
        }
        true
    }
}

/// A level-triggered on/off input
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ControlInput: Send {
    /// `true` when the switch asks for logging
    async fn is_active(&mut self) -> Result<bool>;
}

/// Sysfs GPIO `value` file (`0` or `1`)
#[derive(Debug, Clone)]
pub struct GpioValueFile {
    path: PathBuf,
    active_low: bool,
}

impl GpioValueFile {
    pub fn new(path: impl Into<PathBuf>, active_low: bool) -> Self {
        Self {
            path: path.into(),
            active_low,
        }
    }
}

#[async_trait]
impl ControlInput for GpioValueFile {
    async fn is_active(&mut self) -> Result<bool> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let high = match raw.trim() {
            "1" => true,
            "0" => false,
            other => {
                return Err(LoggerError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unexpected GPIO value '{}' in {}", other, self.path.display()),
                )))
            }
        };
        Ok(high != self.active_low)
    }
}

/// Input stuck at one level
#[derive(Debug, Clone, Copy)]
pub struct FixedInput(pub bool);

#[async_trait]
impl ControlInput for FixedInput {
    async fn is_active(&mut self) -> Result<bool> {
        Ok(self.0)
    }
}

/// Build the input selected in the configuration
pub fn from_config(config: &ControlConfig) -> Box<dyn ControlInput> {
    match config.input {
        ControlInputKind::Gpio => Box::new(GpioValueFile::new(&config.gpio_value_path, config.active_low)),
        ControlInputKind::AlwaysOn => Box::new(FixedInput(true)),
        ControlInputKind::Disabled => Box::new(FixedInput(false)),
    }
}

/// Sample `input` every `poll_interval` until `shutdown` turns true
pub async fn run_control_loop<I: ControlInput + ?Sized>(
    input: &mut I,
    calibration: watch::Receiver<CalibrationState>,
    logging: watch::Sender<LoggingFlag>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut requested = false;
    let mut blinking = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                debug!("Control loop stopping");
                return;
            }
        }

        let calibrated = *calibration.borrow() == CalibrationState::Calibrated;
        if !calibrated {
            if !blinking {
                debug!("Indicator blinking: waiting for calibration");
                blinking = true;
            }
            logging.send_if_modified(|flag| flag.set(false));
            continue;
        }
        blinking = false;

        match input.is_active().await {
            Ok(level) => requested = level,
            Err(e) => warn!("Failed to read logging switch, keeping previous state: {}", e),
        }

        if logging.send_if_modified(|flag| flag.set(requested)) {
            if requested {
                info!("Logging activated.");
            } else {
                info!("Logging deactivated.");
            }
        }
    }
}
