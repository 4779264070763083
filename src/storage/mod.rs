//! # Storage Module
//!
//! The day/drive log tree on removable storage.
//!
//! This module handles:
//! - Day folder (`YYYY-MM-DD`) and drive file (`HH-MM-SS.json`) naming
//! - Validation of client-supplied paths
//! - The storage lock shared by acquisition and the query service
//! - The per-drive log session state machine

pub mod path;
pub mod gateway;
pub mod session;

pub use gateway::{DriveFile, LatestDrive, StorageGateway, StorageUsage};
pub use path::StoragePath;
pub use session::{LogSession, SessionState};
