//! Serial port backed [Connector] for real hardware.
//!
//! The monitor's RS-485 line is configured like so:
//! * Default baud rate: 9600
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None

use std::time::Duration;

use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use thiserror::Error;

use crate::config::ConnectionParameters;
use crate::error::{Error as MonitorError, Result};
use crate::session::{Connector, RtuSession, SerialLine};

/// A session talking to real hardware.
pub type SerialSession = RtuSession<SerialConnector>;

/// Opens the configured port with 8-N-1 framing and the session timeout.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    type Port = PortWrapper;

    fn open(&self, params: &ConnectionParameters) -> Result<PortWrapper> {
        let port = serialport::new(&params.port, params.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(params.timeout)
            .open()
            .map_err(|e| MonitorError::ConnectionFailure {
                port: params.port.clone(),
                reason: e.to_string(),
            })?;
        Ok(PortWrapper(port))
    }
}

/// Adapts a [SerialPort] to [SerialLine].
pub struct PortWrapper(Box<dyn SerialPort>);

#[derive(Debug, Error)]
#[error(transparent)]
pub struct IoError(#[from] std::io::Error);

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            std::io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::NotConnected => embedded_io::ErrorKind::NotConnected,
            std::io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            std::io::ErrorKind::InvalidInput => embedded_io::ErrorKind::InvalidInput,
            std::io::ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
            std::io::ErrorKind::TimedOut => embedded_io::ErrorKind::TimedOut,
            // Non-blocking ports report "no data yet" this way.
            std::io::ErrorKind::WouldBlock => embedded_io::ErrorKind::TimedOut,
            std::io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            std::io::ErrorKind::Unsupported => embedded_io::ErrorKind::Unsupported,
            std::io::ErrorKind::OutOfMemory => embedded_io::ErrorKind::OutOfMemory,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for PortWrapper {
    type Error = IoError;
}

impl embedded_io::Read for PortWrapper {
    fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Self::Error> {
        std::io::Read::read(&mut self.0, buf).map_err(IoError)
    }
}

impl embedded_io::Write for PortWrapper {
    fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    fn flush(&mut self) -> core::result::Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(IoError)
    }
}

impl SerialLine for PortWrapper {
    fn set_read_timeout(&mut self, timeout: Duration) -> core::result::Result<(), IoError> {
        self.0.set_timeout(timeout).map_err(|e| IoError(e.into()))
    }

    fn discard_input(&mut self) -> core::result::Result<(), IoError> {
        self.0.clear(ClearBuffer::Input).map_err(|e| IoError(e.into()))
    }
}
