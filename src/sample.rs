//! # Telemetry Sample
//!
//! One acquisition tick's fused record and its on-disk form: one JSON object
//! per line, grouped into position, engine and inertial fields.
//!
//! ```text
//! {"position":{"time":"HH:MM:SS","latitude":F,"longitude":F},
//!  "engine":{"rpm":I,"speed":I,"maf":F,"instant_economy":F,"throttle":I,"avg_economy":F},
//!  "inertial":{"accel_x":I,"accel_y":I}}
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

/// Fused record of one tick; built once, serialized once
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub satellites: u8,
    pub rpm: u32,
    pub speed_kph: u32,
    pub maf: f32,
    pub throttle: u8,
    pub instant_economy: f32,
    pub avg_economy: f32,
    pub accel_x: i32,
    pub accel_y: i32,
}

#[derive(Serialize)]
struct Record<'a> {
    position: PositionFields<'a>,
    engine: EngineFields,
    inertial: InertialFields,
}

#[derive(Serialize)]
struct PositionFields<'a> {
    time: &'a str,
    latitude: f64,
    longitude: f64,
}

#[derive(Serialize)]
struct EngineFields {
    rpm: u32,
    speed: u32,
    maf: f32,
    instant_economy: f32,
    throttle: u8,
    avg_economy: f32,
}

#[derive(Serialize)]
struct InertialFields {
    accel_x: i32,
    accel_y: i32,
}

impl TelemetrySample {
    /// Time of day, `HH:MM:SS`
    pub fn time_of_day(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }

    /// Whether the receiver had satellites for this sample
    pub fn has_satellite_fix(&self) -> bool {
        self.satellites > 0
    }

    /// Serialize to one record line, newline included
    pub fn to_record_line(&self) -> Result<Vec<u8>> {
        let time = self.time_of_day();
        let record = Record {
            position: PositionFields {
                time: &time,
                latitude: self.latitude,
                longitude: self.longitude,
            },
            engine: EngineFields {
                rpm: self.rpm,
                speed: self.speed_kph,
                maf: self.maf,
                instant_economy: self.instant_economy,
                throttle: self.throttle,
                avg_economy: self.avg_economy,
            },
            inertial: InertialFields {
                accel_x: self.accel_x,
                accel_y: self.accel_y,
            },
        };

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        Ok(line)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::Value;

    pub(crate) fn sample_at(h: u32, m: u32, s: u32) -> TelemetrySample {
        TelemetrySample {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 9, h, m, s).unwrap(),
            latitude: 51.5072,
            longitude: -0.1276,
            satellites: 7,
            rpm: 1726,
            speed_kph: 50,
            maf: 12.5,
            throttle: 18,
            instant_economy: 30.5,
            avg_economy: 28.25,
            accel_x: -12,
            accel_y: 40,
        }
    }

    #[test]
    fn test_record_schema() {
        let line = sample_at(14, 5, 7).to_record_line().unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|&&b| b == b'\n').count(), 1);

        let value: Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["position"]["time"], "14:05:07");
        assert_eq!(value["position"]["latitude"], 51.5072);
        assert_eq!(value["position"]["longitude"], -0.1276);
        assert_eq!(value["engine"]["rpm"], 1726);
        assert_eq!(value["engine"]["speed"], 50);
        assert_eq!(value["engine"]["maf"], 12.5);
        assert_eq!(value["engine"]["instant_economy"], 30.5);
        assert_eq!(value["engine"]["throttle"], 18);
        assert_eq!(value["engine"]["avg_economy"], 28.25);
        assert_eq!(value["inertial"]["accel_x"], -12);
        assert_eq!(value["inertial"]["accel_y"], 40);
    }

    #[test]
    fn test_group_order() {
        let line = sample_at(0, 0, 0).to_record_line().unwrap();
        let text = String::from_utf8(line).unwrap();
        let position = text.find("\"position\"").unwrap();
        let engine = text.find("\"engine\"").unwrap();
        let inertial = text.find("\"inertial\"").unwrap();
        assert!(position < engine && engine < inertial);
    }

    #[test]
    fn test_non_finite_values_stay_well_formed() {
        let mut sample = sample_at(9, 0, 0);
        sample.instant_economy = f32::INFINITY;
        sample.maf = f32::NAN;
        let line = sample.to_record_line().unwrap();
        let value: Value = serde_json::from_slice(&line).unwrap();
        assert!(value["engine"]["maf"].is_null());
        assert!(value["engine"]["instant_economy"].is_null());
    }

    #[test]
    fn test_satellite_fix() {
        let mut sample = sample_at(9, 0, 0);
        assert!(sample.has_satellite_fix());
        sample.satellites = 0;
        assert!(!sample.has_satellite_fix());
    }
}
