//! This crate polls a branch circuit power monitor over Modbus RTU and keeps the
//! latest per-circuit power readings available to any number of readers.
//!
//! It was written against the Veris H704 branch current monitor, which exposes
//! one holding register per circuit carrying instantaneous power in watts.
//!
//! It uses Modbus RTU under the hood, and is suitable for interfacing with the
//! monitor over serial/UART or RS485.
//!
//! The serial port used for monitor comms should be configured like so:
//! * Default baud rate: 9600
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None
//!
//! The pieces, leaf first:
//! * [session::RtuSession] owns the serial line and reads single registers.
//! * [bus::BusGuard] makes sure only one poll cycle talks on the line.
//! * [poller] reads every circuit register into a [snapshot::Snapshot].
//! * [coordinator::RefreshCoordinator] polls on a schedule and serves the latest snapshot.
//! * [metrics] derives total power and interval energy.

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod poller;
pub mod registers;
pub mod serial;
pub mod session;
pub mod snapshot;

#[cfg(test)]
mod mock_serial;
#[cfg(test)]
mod mock_transport;

pub use config::MonitorConfig;
pub use coordinator::{CoordinatorState, Reading, RefreshCoordinator, RefreshOutcome};
pub use error::{Error, Result};
pub use snapshot::Snapshot;
