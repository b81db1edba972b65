//! # Error Types
//!
//! Custom error types for AFHDS3 Link using `thiserror`.

use thiserror::Error;

/// Main error type for AFHDS3 Link
#[derive(Debug, Error)]
pub enum Afhds3Error {
    /// AFHDS3 protocol errors (malformed frames, unknown enum values)
    #[error("AFHDS3 protocol error: {0}")]
    Protocol(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate serial devices could be opened
    #[error("No AFHDS3 module found at: {0}")]
    SerialPortNotFound(String),

    /// Telemetry log errors
    #[error("Telemetry log error: {0}")]
    Telemetry(String),

    /// Telemetry record serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for AFHDS3 Link
pub type Result<T> = std::result::Result<T, Afhds3Error>;
