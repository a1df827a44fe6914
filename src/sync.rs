//! Bounded lock acquisition for shared controller state.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::{Duration, with_timeout};

/// The lock was not released within the allowed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LockTimeout;

/// Locks `mutex`, giving up after `timeout`.
pub async fn lock_within<M: RawMutex, T>(
    mutex: &Mutex<M, T>,
    timeout: Duration,
) -> Result<MutexGuard<'_, M, T>, LockTimeout> {
    with_timeout(timeout, mutex.lock()).await.map_err(|_| {
        warn!("lock not acquired within {} ms", timeout.as_millis());
        LockTimeout
    })
}
