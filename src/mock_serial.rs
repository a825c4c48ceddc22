//! We use this mocking module in unit tests to emulate a serial port.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;

use crate::config::ConnectionParameters;
use crate::error::Result;
use crate::session::{Connector, SerialLine};

/// What the emulated device sends back for one request.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Arrives as soon as the request is flushed.
    Prompt(Vec<u8>),
    /// Arrives only after a read has already timed out waiting for it.
    Late(Vec<u8>),
}

/// Our mock type used to emulate a serial port.
pub struct MockSerial {
    /// Buffer to store data written to the mock serial port
    write_buffer: heapless::Vec<u8, 256>,
    /// Bytes that have arrived and wait to be read
    read_buffer: VecDeque<u8>,
    /// Replies released one per flushed request
    replies: VecDeque<MockReply>,
    /// A late reply still on its way
    in_flight: Option<Vec<u8>>,
    /// Every read timeout the session asked for, in order
    read_timeouts: Vec<Duration>,
    /// Flag to simulate write errors
    should_error_on_write: bool,
    /// Flag to simulate read errors
    should_error_on_read: bool,
}

#[derive(Debug, Error)]
pub enum MockSerialError {
    /// No data arrived before the port timeout
    #[error("simulated timeout")]
    Timeout,
    /// Simulated buffer overflow
    #[error("simulated buffer overflow")]
    BufferOverflow,
    /// Generic simulated error for testing
    #[error("simulated error")]
    SimulatedError,
}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::Timeout => embedded_io::ErrorKind::TimedOut,
            MockSerialError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
            MockSerialError::SimulatedError => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        self.write_buffer
            .extend_from_slice(buf)
            .map_err(|_| MockSerialError::BufferOverflow)?;
        Ok(buf.len())
    }

    /// A flushed request releases the next scripted reply.
    fn flush(&mut self) -> core::result::Result<(), Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        match self.replies.pop_front() {
            Some(MockReply::Prompt(bytes)) => self.read_buffer.extend(bytes),
            Some(MockReply::Late(bytes)) => self.in_flight = Some(bytes),
            None => {}
        }
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Self::Error> {
        if self.should_error_on_read {
            return Err(MockSerialError::SimulatedError);
        }

        if self.read_buffer.is_empty() {
            // The reader gave up; whatever was in flight lands now.
            if let Some(bytes) = self.in_flight.take() {
                self.read_buffer.extend(bytes);
            }
            return Err(MockSerialError::Timeout);
        }

        let bytes_to_read = core::cmp::min(buf.len(), self.read_buffer.len());
        for (slot, byte) in buf.iter_mut().zip(self.read_buffer.drain(..bytes_to_read)) {
            *slot = byte;
        }
        Ok(bytes_to_read)
    }
}

impl SerialLine for MockSerial {
    fn set_read_timeout(&mut self, timeout: Duration) -> core::result::Result<(), Self::Error> {
        self.read_timeouts.push(timeout);
        Ok(())
    }

    fn discard_input(&mut self) -> core::result::Result<(), Self::Error> {
        self.read_buffer.clear();
        Ok(())
    }
}

impl MockSerial {
    /// Create a new MockSerial instance with empty buffers
    pub fn new() -> Self {
        Self {
            write_buffer: heapless::Vec::new(),
            read_buffer: VecDeque::new(),
            replies: VecDeque::new(),
            in_flight: None,
            read_timeouts: Vec::new(),
            should_error_on_write: false,
            should_error_on_read: false,
        }
    }

    /// Set bytes that are already waiting on the line
    pub fn set_read_data(&mut self, data: &[u8]) {
        self.read_buffer.clear();
        self.read_buffer.extend(data.iter().copied());
    }

    /// Queue the replies to the next requests, one per flush
    pub fn set_replies(&mut self, replies: &[MockReply]) {
        self.replies = replies.iter().cloned().collect();
    }

    /// Get a reference to the data that was written to this mock serial port
    pub fn written_data(&self) -> &[u8] {
        &self.write_buffer
    }

    pub fn read_timeouts(&self) -> &[Duration] {
        &self.read_timeouts
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Configure whether read operations should fail with an error
    pub fn set_read_error(&mut self, should_error: bool) {
        self.should_error_on_read = should_error;
    }
}

/// Opens a [MockSerial] with scripted replies.
pub struct MockConnector {
    pub replies: Vec<MockReply>,
    pub fail_open: bool,
    pub fail_reads: bool,
    /// Number of times a port was opened.
    pub opens: Arc<AtomicUsize>,
}

impl MockConnector {
    /// One prompt reply per request, in order.
    pub fn with_responses(frames: &[&[u8]]) -> Self {
        Self::with_replies(
            frames
                .iter()
                .map(|frame| MockReply::Prompt(frame.to_vec()))
                .collect(),
        )
    }

    pub fn with_replies(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            fail_open: false,
            fail_reads: false,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Connector for MockConnector {
    type Port = MockSerial;

    fn open(&self, params: &ConnectionParameters) -> Result<MockSerial> {
        if self.fail_open {
            return Err(crate::error::Error::ConnectionFailure {
                port: params.port.clone(),
                reason: "simulated open failure".into(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);

        let mut port = MockSerial::new();
        port.set_replies(&self.replies);
        port.set_read_error(self.fail_reads);
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Error, Read, Write};

    #[test]
    fn test_new_mock_serial() {
        let mock = MockSerial::new();
        assert_eq!(mock.written_data().len(), 0);
        assert!(mock.read_buffer.is_empty());
        assert!(!mock.should_error_on_write);
        assert!(!mock.should_error_on_read);
    }

    #[test]
    fn test_write_multiple_times() {
        let mut mock = MockSerial::new();
        mock.write(b"Hello, ").unwrap();
        mock.write(b"World!").unwrap();
        assert_eq!(mock.written_data(), b"Hello, World!");
    }

    #[test]
    fn test_write_buffer_overflow() {
        let mut mock = MockSerial::new();
        let large_data = vec![0u8; 300]; // Larger than 256 byte capacity

        let result = mock.write(&large_data);
        assert!(matches!(result, Err(MockSerialError::BufferOverflow)));
    }

    #[test]
    fn test_read_partial_data() {
        let mut mock = MockSerial::new();
        mock.set_read_data(b"Long response data");

        let mut buffer = [0u8; 5];
        assert_eq!(mock.read(&mut buffer).unwrap(), 5);
        assert_eq!(&buffer, b"Long ");
    }

    #[test]
    fn test_read_times_out_after_data_exhausted() {
        let mut mock = MockSerial::new();
        mock.set_read_data(b"Hi");

        let mut buffer = [0u8; 10];
        assert_eq!(mock.read(&mut buffer).unwrap(), 2);

        let err = mock.read(&mut buffer).unwrap_err();
        assert!(matches!(err.kind(), embedded_io::ErrorKind::TimedOut));
    }

    #[test]
    fn test_error_simulation() {
        let mut mock = MockSerial::new();
        mock.set_write_error(true);
        assert!(mock.write(b"test").is_err());
        assert!(mock.flush().is_err());
        assert!(mock.written_data().is_empty());

        mock.set_read_data(b"data");
        mock.set_read_error(true);
        let mut buffer = [0u8; 10];
        let err = mock.read(&mut buffer).unwrap_err();
        assert!(matches!(err.kind(), embedded_io::ErrorKind::Other));
    }

    #[test]
    fn test_replies_follow_requests() {
        let mut mock = MockSerial::new();
        mock.set_replies(&[
            MockReply::Late(b"old".to_vec()),
            MockReply::Prompt(b"new".to_vec()),
        ]);
        let mut buffer = [0u8; 8];

        mock.flush().unwrap();
        let err = mock.read(&mut buffer).unwrap_err();
        assert!(matches!(err.kind(), embedded_io::ErrorKind::TimedOut));
        assert_eq!(mock.read(&mut buffer).unwrap(), 3);
        assert_eq!(&buffer[..3], b"old");

        mock.set_read_data(b"junk");
        mock.discard_input().unwrap();
        mock.flush().unwrap();
        assert_eq!(mock.read(&mut buffer).unwrap(), 3);
        assert_eq!(&buffer[..3], b"new");
    }

    #[test]
    fn test_connector_counts_opens() {
        let connector = MockConnector::with_responses(&[&[0x01]]);
        let params = crate::config::MonitorConfig::new("/dev/ttyMOCK").connection_parameters();

        connector.open(&params).unwrap();
        connector.open(&params).unwrap();
        assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
    }
}
