//! Wall-clock alarms and the periodic checker that fires them.
//!
//! Register encoding, as written by the peer:
//!
//! ```text
//! high: id[15:11] | hour[10:6] | minute[5:0]
//! low:  ringtone[15:9] | weekday_mask[8:2] | repeat[1] | enabled[0]
//! ```
//!
//! Weekday bit 0 is Sunday, bit 6 is Saturday.

use chrono::{Datelike, NaiveDateTime, Timelike};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::{Duration, Ticker, Timer};
use heapless::Vec;

use crate::config::{ALARM_COUNT, Config};
use crate::hardware::traits::{Buzzer, Clock};
use crate::heat::{HeatController, HeatLevel, HeatStatus};
use crate::sync::lock_within;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmError {
    IdOutOfRange,
    TimeInvalid,
    LockFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RepeatMode {
    Once,
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Alarm {
    pub id: u8,
    pub enabled: bool,
    pub hour: u8,
    pub minute: u8,
    pub repeat: RepeatMode,
    pub weekday_mask: u8,
    pub ringtone: u8,
    /// Set when a `Once` alarm has fired; cleared only by saving the alarm again.
    pub triggered: bool,
}

impl Alarm {
    pub const fn disabled(id: u8) -> Self {
        Self {
            id,
            enabled: false,
            hour: 0,
            minute: 0,
            repeat: RepeatMode::Once,
            weekday_mask: 0,
            ringtone: 0,
            triggered: false,
        }
    }

    pub fn decode(high: u16, low: u16) -> Result<Self, AlarmError> {
        let id = ((high >> 11) & 0x1f) as u8;
        let hour = ((high >> 6) & 0x1f) as u8;
        let minute = (high & 0x3f) as u8;
        if hour > 23 || minute > 59 {
            return Err(AlarmError::TimeInvalid);
        }
        if usize::from(id) >= ALARM_COUNT {
            return Err(AlarmError::IdOutOfRange);
        }

        Ok(Self {
            id,
            enabled: low & 0x01 != 0,
            hour,
            minute,
            repeat: if low & 0x02 != 0 {
                RepeatMode::Repeat
            } else {
                RepeatMode::Once
            },
            weekday_mask: ((low >> 2) & 0x7f) as u8,
            ringtone: ((low >> 9) & 0x7f) as u8,
            triggered: false,
        })
    }

    /// Register pair `(high, low)` for this alarm.
    pub fn encode(&self) -> (u16, u16) {
        let high = (u16::from(self.id & 0x1f) << 11)
            | (u16::from(self.hour & 0x1f) << 6)
            | u16::from(self.minute & 0x3f);
        let low = (u16::from(self.ringtone & 0x7f) << 9)
            | (u16::from(self.weekday_mask & 0x7f) << 2)
            | (u16::from(self.repeat == RepeatMode::Repeat) << 1)
            | u16::from(self.enabled);
        (high, low)
    }

    /// Whether the alarm fires at `hour:minute` on `weekday` (days from Sunday).
    ///
    /// A `Once` alarm latches on its first match and never matches again.
    pub fn is_triggered(&mut self, hour: u8, minute: u8, weekday: u8) -> bool {
        if !self.enabled || self.hour != hour || self.minute != minute {
            return false;
        }
        if weekday > 6 || self.weekday_mask & (1 << weekday) == 0 {
            return false;
        }
        if self.repeat == RepeatMode::Once {
            if self.triggered {
                return false;
            }
            self.triggered = true;
        }
        true
    }
}

struct AlarmBook {
    alarms: [Alarm; ALARM_COUNT],
    /// High half of an alarm waiting for its low half.
    pending_high: u16,
}

impl AlarmBook {
    const fn new() -> Self {
        let mut alarms = [Alarm::disabled(0); ALARM_COUNT];
        let mut i = 0;
        while i < ALARM_COUNT {
            alarms[i].id = i as u8;
            i += 1;
        }
        Self {
            alarms,
            pending_high: 0,
        }
    }
}

pub struct AlarmScheduler<M: RawMutex> {
    book: Mutex<M, AlarmBook>,
    lock_timeout: Duration,
}

impl<M: RawMutex> AlarmScheduler<M> {
    pub const fn new(lock_timeout: Duration) -> Self {
        Self {
            book: Mutex::new(AlarmBook::new()),
            lock_timeout,
        }
    }

    async fn lock(&self) -> Result<MutexGuard<'_, M, AlarmBook>, AlarmError> {
        lock_within(&self.book, self.lock_timeout)
            .await
            .map_err(|_| AlarmError::LockFailed)
    }

    /// Decodes and stores an alarm, clearing its once-latch. Returns the stored alarm.
    pub async fn save(&self, high: u16, low: u16) -> Result<Alarm, AlarmError> {
        let alarm = Alarm::decode(high, low)?;
        self.lock().await?.alarms[usize::from(alarm.id)] = alarm;
        info!(
            "alarm {}: {}:{} mask={:b} enabled={}",
            alarm.id,
            alarm.hour,
            alarm.minute,
            alarm.weekday_mask,
            alarm.enabled
        );
        Ok(alarm)
    }

    /// Caches the high half until the matching low half arrives.
    pub async fn store_high(&self, high: u16) -> Result<(), AlarmError> {
        self.lock().await?.pending_high = high;
        Ok(())
    }

    pub async fn pending_high(&self) -> Result<u16, AlarmError> {
        Ok(self.lock().await?.pending_high)
    }

    /// Combines `low` with the cached high half and saves the result.
    pub async fn commit_low(&self, low: u16) -> Result<Alarm, AlarmError> {
        let high = self.pending_high().await?;
        self.save(high, low).await
    }

    /// Disables an alarm; its slot stays allocated.
    pub async fn delete(&self, id: u8) -> Result<(), AlarmError> {
        if usize::from(id) >= ALARM_COUNT {
            return Err(AlarmError::IdOutOfRange);
        }
        let mut book = self.lock().await?;
        book.alarms[usize::from(id)].enabled = false;
        book.alarms[usize::from(id)].triggered = false;
        info!("alarm {}: deleted", id);
        Ok(())
    }

    pub async fn get(&self, id: u8) -> Result<Alarm, AlarmError> {
        let book = self.lock().await?;
        book.alarms
            .get(usize::from(id))
            .copied()
            .ok_or(AlarmError::IdOutOfRange)
    }

    /// Scans every alarm against `now` and returns the ones that fire.
    pub async fn check(&self, now: NaiveDateTime) -> Result<Vec<Alarm, ALARM_COUNT>, AlarmError> {
        let hour = now.hour() as u8;
        let minute = now.minute() as u8;
        let weekday = now.weekday().num_days_from_sunday() as u8;

        let mut book = self.lock().await?;
        let mut fired = Vec::new();
        for alarm in book.alarms.iter_mut() {
            if alarm.is_triggered(hour, minute, weekday) {
                // Capacity equals the number of alarms.
                let _ = fired.push(*alarm);
            }
        }
        Ok(fired)
    }
}

/// Starts heating for a fired alarm. Alarm 0 selects level 1 and alarm 1 level 3.
pub async fn fire<M: RawMutex>(alarm: &Alarm, heat: &HeatController<M>) {
    info!("alarm {}: firing", alarm.id);
    let level = match alarm.id {
        0 => Some(HeatLevel::L1),
        1 => Some(HeatLevel::L3),
        _ => None,
    };
    if let Some(level) = level {
        if heat.set_level(level).await.is_err() {
            warn!("alarm {}: level not applied", alarm.id);
        }
    }
    if heat.set_status(HeatStatus::Running).await.is_err() {
        warn!("alarm {}: heating not started", alarm.id);
    }
}

/// Re-reads the clock every `alarm_check_interval` and scans the alarms once per new minute.
pub async fn run_alarm_checker<M: RawMutex>(
    alarms: &AlarmScheduler<M>,
    heat: &HeatController<M>,
    clock: &impl Clock,
    buzzer: &mut impl Buzzer,
    config: Config,
) -> ! {
    let mut ticker = Ticker::every(config.alarm_check_interval);
    let mut last_minute = None;
    loop {
        if let Some(now) = clock.now() {
            if last_minute != Some(now.minute()) {
                last_minute = Some(now.minute());
                match alarms.check(now).await {
                    Ok(fired) => {
                        for alarm in fired.iter() {
                            fire(alarm, heat).await;
                        }
                        if !fired.is_empty() {
                            buzzer.on();
                            Timer::after(config.alarm_beep).await;
                            buzzer.off();
                        }
                    }
                    Err(_) => {
                        warn!("alarm check skipped");
                        // Retry this minute on the next wake-up.
                        last_minute = None;
                    }
                }
            }
        }
        ticker.next().await;
    }
}
