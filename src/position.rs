//! # Position Provider
//!
//! Satellite navigation and inertial data from a GNSS/IMU receiver with its
//! own sensor fusion. The receiver's fusion algorithm is not ours; this module
//! only defines the queries the acquisition loop needs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Receiver fusion status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionMode {
    /// Still aligning inertial and satellite data
    Initializing,
    /// Fully calibrated; inertial and satellite data are combined
    Calibrated,
    /// Fusion temporarily suspended
    Suspended,
    /// Fusion disabled
    Disabled,
}

impl FusionMode {
    /// Map the receiver's raw status code; unknown codes count as initializing
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => FusionMode::Calibrated,
            2 => FusionMode::Suspended,
            3 => FusionMode::Disabled,
            _ => FusionMode::Initializing,
        }
    }
}

/// Time and position of one fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub timestamp: DateTime<Utc>,
    /// Degrees, signed decimal
    pub latitude: f64,
    /// Degrees, signed decimal
    pub longitude: f64,
    /// Satellites in view; zero means dead reckoning
    pub satellites: u8,
}

impl PositionFix {
    /// Clock-only fix used when the receiver cannot be queried
    pub fn from_clock(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            latitude: 0.0,
            longitude: 0.0,
            satellites: 0,
        }
    }

    /// Coordinates in degrees from the receiver's 1e-7 degree integers
    ///
    /// GNSS/IMU receivers report latitude and longitude as signed integers
    /// in units of 1e-7 degree. A [`PositionProvider`] backed by such a
    /// receiver builds its fixes with this.
    pub fn from_scaled(timestamp: DateTime<Utc>, lat_e7: i32, lon_e7: i32, satellites: u8) -> Self {
        Self {
            timestamp,
            latitude: lat_e7 as f64 / 10_000_000.0,
            longitude: lon_e7 as f64 / 10_000_000.0,
            satellites,
        }
    }
}

/// Lateral and longitudinal acceleration in the receiver's native scale
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InertialSample {
    pub accel_x: i32,
    pub accel_y: i32,
}

/// Queries answered by the position receiver
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PositionProvider: Send {
    /// Current fusion status
    async fn fusion_mode(&mut self) -> Result<FusionMode>;

    /// Latest time and position
    async fn fix(&mut self) -> Result<PositionFix>;

    /// Latest acceleration, if the receiver has one
    async fn inertial(&mut self) -> Option<InertialSample>;
}

/// Stand-in used when no receiver is attached
///
/// Reports calibrated immediately, no satellites, the system UTC clock and no
/// inertial data.
#[derive(Debug, Default)]
pub struct NoReceiver;

#[async_trait]
impl PositionProvider for NoReceiver {
    async fn fusion_mode(&mut self) -> Result<FusionMode> {
        Ok(FusionMode::Calibrated)
    }

    async fn fix(&mut self) -> Result<PositionFix> {
        Ok(PositionFix::from_clock(Utc::now()))
    }

    async fn inertial(&mut self) -> Option<InertialSample> {
        None
    }
}
