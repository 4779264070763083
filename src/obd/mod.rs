//! # OBD-II Module
//!
//! Engine data from the vehicle diagnostics bus via an ELM327-compatible adapter.
//!
//! This module handles:
//! - Opening the adapter's serial link and reconnecting after unplug
//! - Adapter initialisation (reset, echo off, automatic protocol)
//! - Bounded request/reply exchanges with a fixed reply buffer
//! - Decoding RPM, speed, mass air flow and throttle replies

pub mod protocol;
pub mod client;
pub mod serial;

pub use client::{EngineReadings, EngineSource, ObdClient};
pub use protocol::{Pid, RawReply};
pub use serial::ReconnectingObd;
