//! # Error Types
//!
//! Custom error types for Drive Logger using `thiserror`.

use thiserror::Error;

/// Main error type for Drive Logger
#[derive(Debug, Error)]
pub enum LoggerError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial link errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// No OBD adapter found on any candidate path
    #[error("No OBD adapter found (tried: {0})")]
    SerialPortNotFound(String),

    /// The adapter did not answer within the request timeout
    #[error("OBD request timed out: {0}")]
    ObdTimeout(String),

    /// The storage lock could not be acquired within its timeout
    #[error("Storage busy, try again")]
    StorageBusy,

    /// A requested day, drive or path does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A user-supplied path was rejected before reaching storage
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Record serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Position receiver errors
    #[error("Position receiver error: {0}")]
    Position(String),
}

/// Result type alias for Drive Logger
pub type Result<T> = std::result::Result<T, LoggerError>;
