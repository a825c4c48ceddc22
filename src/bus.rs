//! Exclusive access to the shared RTU bus.
//!
//! A Modbus RTU line is half-duplex: two interleaved requests corrupt each
//! other's framing. The guard owns the session, so the only way to issue a
//! request is through a held lock, and the lock is released on every exit path
//! when the [BusLock] drops.

use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

/// Lock around the one session of a device.
pub struct BusGuard<T> {
    session: Mutex<T>,
}

/// Held access to the session.
pub type BusLock<'a, T> = MutexGuard<'a, T>;

impl<T> BusGuard<T> {
    pub fn new(session: T) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    /// Block until the bus is free.
    pub fn acquire(&self) -> BusLock<'_, T> {
        // A panicking cycle leaves the session itself intact.
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the bus only if no cycle currently holds it.
    pub fn try_acquire(&self) -> Option<BusLock<'_, T>> {
        match self.session.try_lock() {
            Ok(lock) => Some(lock),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}
