//! # Calibration Gate
//!
//! Holds the acquisition loop until the position receiver reports that its
//! inertial and satellite data are fused.
//!
//! ```text
//! Uncalibrated --first poll--> Calibrating --fusion mode calibrated--> Calibrated
//!                                  ^    |
//!                                  +----+ anything else, poll again
//! ```
//!
//! There is no way back from `Calibrated`. Every poll publishes the current
//! state on a `watch` channel so the control context can show progress.

use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::position::{FusionMode, PositionProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalibrationState {
    #[default]
    Uncalibrated,
    Calibrating,
    Calibrated,
}

/// Calibration state machine, owned by the acquisition loop
#[derive(Debug)]
pub struct CalibrationGate {
    state: CalibrationState,
    poll_interval: Duration,
    status: watch::Sender<CalibrationState>,
}

impl CalibrationGate {
    /// Create a gate and the receiver other contexts observe it through
    pub fn new(poll_interval: Duration) -> (Self, watch::Receiver<CalibrationState>) {
        let (status, rx) = watch::channel(CalibrationState::Uncalibrated);
        let gate = Self {
            state: CalibrationState::Uncalibrated,
            poll_interval,
            status,
        };
        (gate, rx)
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_calibrated(&self) -> bool {
        self.state == CalibrationState::Calibrated
    }

    /// Poll the receiver once and advance the state machine
    pub async fn poll<P: PositionProvider + ?Sized>(&mut self, provider: &mut P) -> CalibrationState {
        if self.is_calibrated() {
            return self.state;
        }

        self.state = CalibrationState::Calibrating;

        match provider.fusion_mode().await {
            Ok(FusionMode::Calibrated) => {
                info!("Position receiver calibrated");
                self.state = CalibrationState::Calibrated;
            }
            Ok(mode) => info!("Fusion mode {:?}: perform calibration manoeuvres", mode),
            Err(e) => warn!("Failed to query fusion status, retrying: {}", e),
        }

        self.status.send_replace(self.state);
        self.state
    }

    /// Block until the receiver reports calibrated
    ///
    /// Never times out: logging is meaningless without a fused position.
    pub async fn await_calibration<P: PositionProvider + ?Sized>(&mut self, provider: &mut P) -> CalibrationState {
        if !self.is_calibrated() {
            info!("Waiting for position receiver calibration...");
        }
        while self.poll(provider).await != CalibrationState::Calibrated {
            tokio::time::sleep(self.poll_interval).await;
        }
        self.state
    }
}
