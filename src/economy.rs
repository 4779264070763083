//! # Fuel Economy
//!
//! Instantaneous and running-average fuel economy from road speed and mass air
//! flow. Speed is converted from km/h to mph and mass air flow from g/s to an
//! approximate fuel flow in gallons per hour, so both figures come out in mpg.
//!
//! ```
//! use drive_logger::economy::{average_economy, instant_economy};
//!
//! assert_eq!(instant_economy(0, 12.0), 0.0);
//! assert_eq!(average_economy(42.0, 0.0), 0.0);
//! ```

use std::time::Duration;

/// km/h to mph
pub const KPH_TO_MPH: f64 = 0.621371;

/// Mass air flow (g/s) to fuel flow (gal/h) at stoichiometric petrol combustion
pub const MAF_TO_GALLONS_PER_HOUR: f64 = 0.0805;

/// Instantaneous economy in mpg; zero unless both speed and MAF are positive
#[must_use]
pub fn instant_economy(speed_kph: u32, maf: f32) -> f32 {
    if speed_kph == 0 || !(maf > 0.0) {
        return 0.0;
    }
    let mph = speed_kph as f64 * KPH_TO_MPH;
    let gph = maf as f64 * MAF_TO_GALLONS_PER_HOUR;
    (mph / gph) as f32
}

/// Ratio of the two accumulators; zero while no fuel has been accumulated
#[must_use]
pub fn average_economy(distance_time: f64, fuel_time: f64) -> f32 {
    if fuel_time > 0.0 {
        (distance_time / fuel_time) as f32
    } else {
        0.0
    }
}

/// Running speed-time and fuel-time products
///
/// Both sums only ever grow; [`FuelAccumulator::reset`] is the only way back
/// to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FuelAccumulator {
    distance_time: f64,
    fuel_time: f64,
}

impl FuelAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one interval's contribution
    ///
    /// Returns `false` and leaves the sums untouched unless both speed and MAF
    /// are positive.
    pub fn accumulate(&mut self, speed_kph: u32, maf: f32, elapsed: Duration) -> bool {
        if speed_kph == 0 || !(maf > 0.0) {
            return false;
        }
        let dt = elapsed.as_secs_f64();
        self.distance_time += speed_kph as f64 * KPH_TO_MPH * dt;
        self.fuel_time += maf as f64 * MAF_TO_GALLONS_PER_HOUR * dt;
        true
    }

    pub fn average(&self) -> f32 {
        average_economy(self.distance_time, self.fuel_time)
    }

    pub fn distance_time(&self) -> f64 {
        self.distance_time
    }

    pub fn fuel_time(&self) -> f64 {
        self.fuel_time
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
