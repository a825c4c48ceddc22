//! Values derived from a snapshot, and the table handed to the presentation layer.

use std::time::Duration;

use crate::registers::CIRCUIT_COUNT;
use crate::snapshot::Snapshot;

/// Sum of a power vector in watts.
pub fn total_power(circuits: &[u16]) -> u32 {
    circuits.iter().map(|watts| u32::from(*watts)).sum()
}

/// Energy implied by `total_power_w` held for one refresh interval, in kWh.
///
/// This is not a running meter: it is recomputed from the current reading only,
/// so fluctuations between samples are not captured and nothing carries over
/// restarts.
pub fn interval_energy_kwh(total_power_w: u32, interval: Duration) -> f64 {
    (f64::from(total_power_w) / 1000.0) * (interval.as_secs_f64() / 3600.0)
}

/// One presentation value of a circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitReading {
    pub circuit: usize,
    pub unique_id: String,
    pub watts: u16,
}

/// Every presentation value of one snapshot: a reading per circuit, the
/// total power and the interval energy.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorTable {
    pub circuits: Vec<CircuitReading>,
    pub total_power_w: u32,
    pub energy_kwh: f64,
    pub stale: bool,
}

impl SensorTable {
    pub fn from_snapshot<const N: usize>(
        snapshot: &Snapshot<N>,
        interval: Duration,
        stale: bool,
    ) -> Self {
        let circuits = snapshot
            .iter_circuits()
            .map(|(circuit, watts)| CircuitReading {
                circuit,
                unique_id: format!("circuit_{circuit}"),
                watts,
            })
            .collect();
        Self {
            circuits,
            total_power_w: snapshot.total_power(),
            energy_kwh: interval_energy_kwh(snapshot.total_power(), interval),
            stale,
        }
    }

    pub fn circuit(&self, circuit: usize) -> Option<&CircuitReading> {
        circuit.checked_sub(1).and_then(|index| self.circuits.get(index))
    }
}

impl Default for SensorTable {
    fn default() -> Self {
        Self::from_snapshot(&Snapshot::<CIRCUIT_COUNT>::default(), Duration::ZERO, false)
    }
}
