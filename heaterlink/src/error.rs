//! Error types for heaterlink.

use std::io;
use thiserror::Error;

/// Result type for heaterlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for heaterlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Not connected to a device.
    #[error("Not connected to a device")]
    NotConnected,

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The device reported an OTA failure (`OTA_ERROR` / `OTA_FAIL`).
    #[error("Device reported OTA failure: {0}")]
    DeviceFault(String),

    /// Protocol error (malformed or unexpected response).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation interrupted by the embedding application.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
