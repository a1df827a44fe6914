//! Software real-time clock on top of the embassy time driver.
//!
//! Keeps the UTC seconds last set plus the uptime instant they were set at. The count is
//! lost on reset and restarts at 2000-01-01T00:00:00Z until the peer sets the time again.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Instant;

use super::traits::{Clock, RtcError};
use crate::control::UTC_EPOCH_2000;

#[derive(Clone, Copy)]
struct Anchor {
    utc: u32,
    at: Instant,
}

pub struct SoftRtc<M: RawMutex> {
    anchor: Mutex<M, Cell<Option<Anchor>>>,
}

impl<M: RawMutex> SoftRtc<M> {
    pub const fn new() -> Self {
        Self {
            anchor: Mutex::new(Cell::new(None)),
        }
    }

    fn anchor(&self) -> Anchor {
        self.anchor.lock(|cell| {
            cell.get().unwrap_or_else(|| {
                let boot = Anchor {
                    utc: UTC_EPOCH_2000,
                    at: Instant::from_ticks(0),
                };
                cell.set(Some(boot));
                boot
            })
        })
    }
}

impl<M: RawMutex> Default for SoftRtc<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> Clock for SoftRtc<M> {
    fn utc(&self) -> u32 {
        let anchor = self.anchor();
        let elapsed = Instant::now().saturating_duration_since(anchor.at).as_secs();
        anchor.utc.saturating_add(elapsed.min(u64::from(u32::MAX)) as u32)
    }

    fn set_utc(&self, utc: u32) -> Result<(), RtcError> {
        if utc < UTC_EPOCH_2000 {
            return Err(RtcError::BeforeEpoch);
        }
        let anchor = Anchor {
            utc,
            at: Instant::now(),
        };
        self.anchor.lock(|cell| cell.set(Some(anchor)));
        Ok(())
    }
}
