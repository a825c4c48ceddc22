//! Our error types for the branch power monitor.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Custom error type for acquiring readings from the power monitor.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to open serial port {port}: {reason}")]
    ConnectionFailure { port: String, reason: String },
    #[error("Serial port is not connected")]
    NotConnected,
    #[error("Serial communication error: {0:?}")]
    SerialError(embedded_io::ErrorKind),
    #[error("Modbus protocol error: {0}")]
    ModbusError(rmodbus::ErrorKind),
    #[error("Communication timeout")]
    Timeout,
    #[error("Invalid response received")]
    InvalidResponse,
    #[error("Response does not fit the frame buffer")]
    BufferError,
    #[error("Background task failed: {0}")]
    TaskFailed(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error invalidates the rest of a poll cycle.
    ///
    /// Everything else is a fault of a single register: the poller records it,
    /// substitutes `0` and moves on to the next circuit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::NotConnected | Error::SerialError(_) | Error::ConnectionFailure { .. }
        )
    }

    /// Whether the host should treat this as "not ready yet" and retry setup later.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Error::ConnectionFailure { .. })
    }
}

impl From<rmodbus::ErrorKind> for Error {
    fn from(err: rmodbus::ErrorKind) -> Self {
        Error::ModbusError(err)
    }
}
