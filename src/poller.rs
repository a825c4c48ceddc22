//! One poll cycle: every circuit register, read in order, under the bus lock.

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::bus::BusGuard;
use crate::error::{Error, Result};
use crate::registers::{FIRST_CIRCUIT_REGISTER, circuit_for_register};
use crate::session::Transport;
use crate::snapshot::{PowerVector, Snapshot};

/// Run a full cycle, holding the bus for all `N` reads.
pub fn poll<T: Transport, const N: usize>(
    bus: &BusGuard<T>,
    device_id: u8,
) -> Result<Snapshot<N>> {
    let mut session = bus.acquire();
    read_cycle(&mut *session, device_id)
}

/// Run a full cycle on a session the caller already holds the bus lock for.
///
/// A register that cannot be read is logged and left at `0`; the cycle goes on.
/// A fatal transport error, or the session dropping mid-cycle, aborts the
/// remaining reads and fails the whole cycle.
pub fn read_cycle<T: Transport + ?Sized, const N: usize>(
    session: &mut T,
    device_id: u8,
) -> Result<Snapshot<N>> {
    if !session.is_connected() {
        return Err(Error::NotConnected);
    }

    let mut circuits: PowerVector<N> = [0; N];
    let mut register_faults = 0;

    for (slot, address) in circuits.iter_mut().zip(FIRST_CIRCUIT_REGISTER..) {
        match session.read_holding_register(address, device_id) {
            Ok(watts) => *slot = watts,
            Err(err) if err.is_fatal() => {
                error!(register = address, error = %err, "Poll cycle aborted");
                return Err(err);
            }
            Err(err) => {
                warn!(
                    register = address,
                    circuit = circuit_for_register(address),
                    error = %err,
                    "Register read failed, substituting 0"
                );
                register_faults += 1;
                if !session.is_connected() {
                    error!(register = address, "Connection lost mid-cycle");
                    return Err(Error::NotConnected);
                }
            }
        }
    }

    let snapshot = Snapshot::new(circuits, register_faults, Utc::now());
    debug!(
        total_power = snapshot.total_power(),
        register_faults,
        "Poll cycle complete"
    );
    Ok(snapshot)
}
