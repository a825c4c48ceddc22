//! This module is used to define the holding register layout of the branch power monitor.
//!
//! Each monitored circuit has exactly one 16-bit holding register carrying its
//! instantaneous power in watts. Circuit `n` lives at register `n`, so the
//! register map starts at `1`, not `0`.

/// Number of circuits (and registers) read per poll cycle.
pub const CIRCUIT_COUNT: usize = 42;

/// __R__ - Register holding the power of circuit 1.
pub const FIRST_CIRCUIT_REGISTER: u16 = 1;

/// Default Modbus unit ID of the monitor.
pub const DEFAULT_SLAVE_ID: u8 = 2;

/// Default baud rate of the monitor's RS-485 port.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Return the 1-based circuit index read from a holding register.
pub fn circuit_for_register(register: u16) -> Option<usize> {
    register
        .checked_sub(FIRST_CIRCUIT_REGISTER)
        .map(|offset| offset as usize + 1)
}
