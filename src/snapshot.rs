use chrono::{DateTime, Utc};

use crate::metrics;
use crate::registers::CIRCUIT_COUNT;

/// Instantaneous power of every circuit in watts, circuit `n` at index `n - 1`.
///
/// `0` is also the value of a register that could not be read this cycle.
pub type PowerVector<const N: usize = CIRCUIT_COUNT> = [u16; N];

/// One complete, immutable result of a poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<const N: usize = CIRCUIT_COUNT> {
    circuits: PowerVector<N>,
    total_power: u32,
    register_faults: usize,
    captured_at: Option<DateTime<Utc>>,
}

impl<const N: usize> Snapshot<N> {
    /// Build a snapshot, deriving the total from the circuits.
    pub fn new(
        circuits: PowerVector<N>,
        register_faults: usize,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            total_power: metrics::total_power(&circuits),
            circuits,
            register_faults,
            captured_at: Some(captured_at),
        }
    }

    pub fn circuits(&self) -> &PowerVector<N> {
        &self.circuits
    }

    /// Power of a 1-based circuit index.
    pub fn circuit(&self, circuit: usize) -> Option<u16> {
        circuit
            .checked_sub(1)
            .and_then(|index| self.circuits.get(index))
            .copied()
    }

    /// `(circuit, watts)` pairs in circuit order.
    pub fn iter_circuits(&self) -> impl Iterator<Item = (usize, u16)> + '_ {
        self.circuits
            .iter()
            .enumerate()
            .map(|(index, watts)| (index + 1, *watts))
    }

    /// Sum of all circuits in watts.
    pub fn total_power(&self) -> u32 {
        self.total_power
    }

    /// Registers substituted with `0` in this cycle.
    pub fn register_faults(&self) -> usize {
        self.register_faults
    }

    /// `None` for the placeholder served before the first successful cycle.
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        self.captured_at
    }
}

impl<const N: usize> Default for Snapshot<N> {
    fn default() -> Self {
        Self {
            circuits: [0; N],
            total_power: 0,
            register_faults: 0,
            captured_at: None,
        }
    }
}
