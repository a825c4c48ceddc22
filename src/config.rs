//! Configuration of a monitor instance, loaded from TOML.
//!
//! ```toml
//! port = "/dev/ttyUSB1"
//! baud_rate = 9600
//! slave_id = 2
//! scan_interval_secs = 30
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::registers::{DEFAULT_BAUD_RATE, DEFAULT_SLAVE_ID};

/// Response timeout for every request on the serial line.
pub const SERIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Default time between two poll cycles.
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 30;

/// Consecutive failed cycles before readings are flagged as stale.
pub const DEFAULT_STALE_AFTER_FAILURES: u32 = 3;

/// Configuration for one monitored device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Serial port path, e.g. `/dev/ttyUSB1` or `COM3`. No default.
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Modbus unit ID of the monitor on the bus.
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_stale_after_failures")]
    pub stale_after_failures: u32,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_slave_id() -> u8 {
    DEFAULT_SLAVE_ID
}

fn default_scan_interval_secs() -> u64 {
    DEFAULT_SCAN_INTERVAL_SECS
}

fn default_stale_after_failures() -> u32 {
    DEFAULT_STALE_AFTER_FAILURES
}

impl MonitorConfig {
    /// Config for `port` with every other field at its default.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            slave_id: DEFAULT_SLAVE_ID,
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            stale_after_failures: DEFAULT_STALE_AFTER_FAILURES,
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), port = %config.port, "Loaded monitor config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(Error::InvalidConfig("serial port must be set".into()));
        }
        if self.baud_rate == 0 {
            return Err(Error::InvalidConfig("baud rate must be non-zero".into()));
        }
        // Only 1-247 range is suitable ID for single Modbus device.
        if !(1..=247).contains(&self.slave_id) {
            return Err(Error::InvalidConfig(format!(
                "slave id {} outside 1..=247",
                self.slave_id
            )));
        }
        if self.scan_interval_secs == 0 {
            return Err(Error::InvalidConfig("scan interval must be non-zero".into()));
        }
        if self.stale_after_failures == 0 {
            return Err(Error::InvalidConfig(
                "stale threshold must be at least one cycle".into(),
            ));
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn connection_parameters(&self) -> ConnectionParameters {
        ConnectionParameters {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            device_id: self.slave_id,
            timeout: SERIAL_TIMEOUT,
        }
    }
}

/// Immutable parameters of one serial session. Framing is always 8-N-1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub port: String,
    pub baud_rate: u32,
    pub device_id: u8,
    pub timeout: Duration,
}
