//! # Drive Logger Library
//!
//! Vehicle telemetry logging: engine data from an ELM327-compatible OBD-II
//! adapter and position from a GNSS/IMU receiver, fused once per tick with
//! fuel-economy figures and appended to a day/drive log tree that an HTTP
//! query service reads concurrently.

pub mod config;
pub mod error;
pub mod obd;
pub mod position;
pub mod calibration;
pub mod economy;
pub mod sample;
pub mod storage;
pub mod scheduler;
pub mod control;
pub mod server;
