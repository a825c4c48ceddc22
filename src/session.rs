use std::time::{Duration, Instant};

use embedded_io::{Error as _, Read as _, Write as _};
use tracing::{debug, info, warn};

use crate::config::ConnectionParameters;
use crate::error::{Error, Result};

/// Silence on the line after which a late or partial reply is considered gone.
pub const SETTLE_TIME: Duration = Duration::from_millis(100);

/// Operations the poller and coordinator need from a Modbus session.
pub trait Transport {
    /// Open the line. Calling this on a connected session is a no-op.
    fn connect(&mut self) -> Result<()>;

    /// Local connection state only, never touches the bus.
    fn is_connected(&self) -> bool;

    /// Issue one read-holding-registers request for a single register.
    fn read_holding_register(&mut self, address: u16, device_id: u8) -> Result<u16>;

    /// Release the serial handle. Safe to call on a closed session.
    fn close(&mut self);
}

/// Line control on top of [embedded_io::Read] & [embedded_io::Write].
///
/// A 0x03 response does not echo the register address, so bytes left over
/// from an earlier request would parse as a valid answer to the next one.
pub trait SerialLine: embedded_io::Read + embedded_io::Write {
    /// Upper bound for the next blocking read.
    fn set_read_timeout(&mut self, timeout: Duration) -> core::result::Result<(), Self::Error>;

    /// Drop every received byte that has not been read yet.
    fn discard_input(&mut self) -> core::result::Result<(), Self::Error>;
}

/// Opens the byte stream a [RtuSession] talks over.
///
/// Any [SerialLine] can carry the session, which is how a mock port is
/// swapped in for tests.
pub trait Connector {
    type Port: SerialLine;

    fn open(&self, params: &ConnectionParameters) -> Result<Self::Port>;
}

/// A Modbus RTU session over a serial line.
///
/// `L` is the capacity of the frame buffers.
pub struct RtuSession<C: Connector, const L: usize = 64> {
    connector: C,
    params: ConnectionParameters,
    port: Option<C::Port>,
}

fn serial_error<E: embedded_io::Error>(err: E) -> Error {
    Error::SerialError(err.kind())
}

impl<C: Connector, const L: usize> RtuSession<C, L> {
    /// Create a disconnected session.
    pub fn new(connector: C, params: ConnectionParameters) -> Self {
        Self {
            connector,
            params,
            port: None,
        }
    }

    /// Read one complete response frame.
    ///
    /// The whole frame, not each read, is bounded by the session timeout.
    fn read_frame(
        port: &mut C::Port,
        started: Instant,
        params: &ConnectionParameters,
    ) -> Result<heapless::Vec<u8, L>> {
        let mut buff: heapless::Vec<u8, L> = heapless::Vec::new();
        let mut temp_buf = [0u8; L];
        loop {
            let expected = expected_frame_len(&buff);
            if buff.len() >= expected {
                return Ok(buff);
            }
            if expected > L {
                return Err(Error::BufferError);
            }
            let remaining = params.timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            port.set_read_timeout(remaining).map_err(serial_error)?;
            // Never read past the end of this frame.
            let wanted = expected - buff.len();
            match port.read(&mut temp_buf[..wanted]) {
                Ok(bytes_read) => {
                    if buff.extend_from_slice(&temp_buf[..bytes_read]).is_err() {
                        return Err(Error::BufferError);
                    }
                }
                Err(e) => match e.kind() {
                    embedded_io::ErrorKind::TimedOut => return Err(Error::Timeout),
                    embedded_io::ErrorKind::Interrupted => continue,
                    kind => return Err(Error::SerialError(kind)),
                },
            }
        }
    }

    fn exchange(&mut self, address: u16, device_id: u8) -> Result<u16> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        let mut buff: heapless::Vec<u8, L> = heapless::Vec::new();
        let mut req = rmodbus::client::ModbusRequest::new(device_id, rmodbus::ModbusProto::Rtu);
        req.generate_get_holdings(address, 1, &mut buff)?;

        port.discard_input().map_err(serial_error)?;
        let started = Instant::now();
        port.write_all(&buff)
            .and_then(|_| port.flush())
            .map_err(serial_error)?;

        let response = Self::read_frame(port, started, &self.params)?;

        let mut parsed_data: heapless::Vec<u16, 4> = heapless::Vec::new();
        req.parse_u16(&response, &mut parsed_data)?;

        parsed_data.first().copied().ok_or(Error::InvalidResponse)
    }

    /// Swallow whatever is still arriving for a failed request.
    ///
    /// Reads until the line stays quiet for [SETTLE_TIME], bounded by the
    /// session timeout, then clears the input buffer.
    fn resync(&mut self) -> Result<()> {
        let Some(port) = self.port.as_mut() else {
            return Ok(());
        };
        let started = Instant::now();
        let mut scratch = [0u8; L];
        let mut discarded = 0;
        port.set_read_timeout(SETTLE_TIME).map_err(serial_error)?;
        while started.elapsed() < self.params.timeout {
            match port.read(&mut scratch) {
                Ok(0) => break,
                Ok(bytes_read) => discarded += bytes_read,
                Err(e) => match e.kind() {
                    embedded_io::ErrorKind::TimedOut => break,
                    embedded_io::ErrorKind::Interrupted => continue,
                    kind => return Err(Error::SerialError(kind)),
                },
            }
        }
        port.discard_input().map_err(serial_error)?;
        if discarded > 0 {
            debug!(discarded, "Discarded stale bytes from the line");
        }
        Ok(())
    }
}

impl<C: Connector, const L: usize> Transport for RtuSession<C, L> {
    fn connect(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        info!(
            port = %self.params.port,
            baud_rate = self.params.baud_rate,
            "Connecting to branch power monitor"
        );
        let port = self.connector.open(&self.params)?;
        self.port = Some(port);
        info!(port = %self.params.port, "Modbus connection established");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn read_holding_register(&mut self, address: u16, device_id: u8) -> Result<u16> {
        let mut result = self.exchange(address, device_id);
        if result.as_ref().is_err_and(|err| !err.is_fatal()) {
            if let Err(err) = self.resync() {
                result = Err(err);
            }
        }
        if let Err(Error::SerialError(kind)) = &result {
            // The line is unusable; drop the handle so the next tick reconnects.
            warn!(port = %self.params.port, ?kind, "Serial line failed, closing session");
            self.port = None;
        }
        debug!(address, device_id, ok = result.is_ok(), "Read holding register");
        result
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!(port = %self.params.port, "Modbus connection closed");
        }
    }
}

/// Length of the response frame whose first bytes are in `frame`.
///
/// An exception response is unit id, function code, exception code and CRC.
/// A normal response is unit id, function code, byte count, data and CRC.
fn expected_frame_len(frame: &[u8]) -> usize {
    match frame {
        [_, function, ..] if function & 0x80 != 0 => 5,
        [_, _, byte_count, ..] => 5 + *byte_count as usize,
        _ => 5,
    }
}
