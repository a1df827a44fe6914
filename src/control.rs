//! The device's external control surface: validated register reads and writes shared by the
//! RPC server, the text command responder and the keypad.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::Duration;
use heapless::Vec;

use crate::alarm::{Alarm, AlarmScheduler};
use crate::hardware::traits::Clock;
use crate::heat::{HeatController, HeatLevel, HeatStatus};
use crate::registers::{Access, Exception, RegisterId, RegisterTable, span};
use crate::sync::lock_within;

/// 2000-01-01T00:00:00Z, the earliest instant the clock accepts.
pub const UTC_EPOCH_2000: u32 = 946_684_800;

/// Snapshot reported by the text status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceStatus {
    pub power: u16,
    pub status: HeatStatus,
    pub level: HeatLevel,
    pub timer_minutes: u16,
    pub remain_sec: u32,
}

pub struct ControlSurface<'a, M: RawMutex, C: Clock> {
    registers: &'a Mutex<M, RegisterTable>,
    heat: &'a HeatController<M>,
    alarms: &'a AlarmScheduler<M>,
    clock: &'a C,
    lock_timeout: Duration,
}

impl<M: RawMutex, C: Clock> Clone for ControlSurface<'_, M, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: RawMutex, C: Clock> Copy for ControlSurface<'_, M, C> {}

impl<'a, M: RawMutex, C: Clock> ControlSurface<'a, M, C> {
    pub fn new(
        registers: &'a Mutex<M, RegisterTable>,
        heat: &'a HeatController<M>,
        alarms: &'a AlarmScheduler<M>,
        clock: &'a C,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            registers,
            heat,
            alarms,
            clock,
            lock_timeout,
        }
    }

    pub fn heat(&self) -> &'a HeatController<M> {
        self.heat
    }

    /// Copies the live heating state into the mirrored status registers.
    async fn refresh_heat_mirror(&self) -> Result<(), Exception> {
        let state = self
            .heat
            .snapshot()
            .await
            .map_err(|_| Exception::ServerDeviceFailure)?;
        let mut table = lock_within(self.registers, self.lock_timeout)
            .await
            .map_err(|_| Exception::ServerDeviceFailure)?;
        table.set(RegisterId::HeatingStatus, state.status as u16)?;
        table.set(RegisterId::HeatingLevel, state.level as u16)?;
        table.set(RegisterId::HeatingTimer, state.set_minutes)?;
        Ok(())
    }

    /// Reads `count` registers starting at `start`.
    pub async fn read(
        &self,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16, { RegisterId::COUNT }>, Exception> {
        let ids = span(start, count)?;
        if ids.iter().any(|id| id.access() == Access::WriteOnly) {
            return Err(Exception::IllegalValue);
        }

        if ids.iter().any(|id| {
            matches!(
                id,
                RegisterId::HeatingStatus | RegisterId::HeatingLevel | RegisterId::HeatingTimer
            )
        }) {
            self.refresh_heat_mirror().await?;
        }

        let table = lock_within(self.registers, self.lock_timeout)
            .await
            .map_err(|_| Exception::ServerDeviceFailure)?;
        let mut values = Vec::new();
        for &id in ids {
            let _ = values.push(table.get(id));
        }
        Ok(values)
    }

    /// Writes `values` to consecutive registers starting at `start`.
    ///
    /// The whole transaction is validated before anything is applied, so a range or encoding
    /// error leaves every register untouched. Registers are then applied in address order;
    /// only a lock timeout or a clock failure can stop the transaction part way through.
    pub async fn write(&self, start: u16, values: &[u16]) -> Result<(), Exception> {
        let count = u16::try_from(values.len()).map_err(|_| Exception::IllegalValue)?;
        let ids = span(start, count)?;
        let writes = || ids.iter().copied().zip(values.iter().copied());

        for (id, value) in writes() {
            id.validate(value)?;
        }

        let value_of = |wanted: RegisterId| writes().find(|&(id, _)| id == wanted).map(|(_, v)| v);

        let utc = match (value_of(RegisterId::UtcHigh), value_of(RegisterId::UtcLow)) {
            (Some(high), Some(low)) => {
                let utc = (u32::from(high) << 16) | u32::from(low);
                if utc < UTC_EPOCH_2000 {
                    return Err(Exception::IllegalValue);
                }
                Some(utc)
            }
            (None, None) => None,
            // Both halves travel in one transaction.
            _ => return Err(Exception::IllegalValue),
        };

        match (value_of(RegisterId::AlarmSetHigh), value_of(RegisterId::AlarmSetLow)) {
            (Some(high), Some(low)) => {
                Alarm::decode(high, low).map_err(|_| Exception::IllegalValue)?;
            }
            (Some(high), None) => {
                Alarm::decode(high, 0).map_err(|_| Exception::IllegalValue)?;
            }
            (None, Some(low)) => {
                let high = self
                    .alarms
                    .pending_high()
                    .await
                    .map_err(|_| Exception::ServerDeviceFailure)?;
                Alarm::decode(high, low).map_err(|_| Exception::IllegalValue)?;
            }
            (None, None) => {}
        }

        for (id, value) in writes() {
            self.apply(id, value, utc).await?;
        }
        Ok(())
    }

    pub async fn write_one(&self, id: RegisterId, value: u16) -> Result<(), Exception> {
        self.write(id.address(), &[value]).await
    }

    async fn store(&self, id: RegisterId, value: u16) -> Result<(), Exception> {
        lock_within(self.registers, self.lock_timeout)
            .await
            .map_err(|_| Exception::ServerDeviceFailure)?
            .set(id, value)
    }

    async fn apply(&self, id: RegisterId, value: u16, utc: Option<u32>) -> Result<(), Exception> {
        const FAILED: Exception = Exception::ServerDeviceFailure;

        self.store(id, value).await?;
        match id {
            RegisterId::PowerSwitch => {
                info!("power switch -> {}", value);
                if value == 0 {
                    self.heat.set_status(HeatStatus::Stopped).await.map_err(|_| FAILED)?;
                }
            }
            RegisterId::UtcHigh => {
                if let Some(utc) = utc {
                    self.clock.set_utc(utc).map_err(|_| FAILED)?;
                    info!("clock set to {}", utc);
                }
            }
            RegisterId::UtcLow => {}
            RegisterId::AlarmSetHigh => {
                self.alarms.store_high(value).await.map_err(|_| FAILED)?;
            }
            RegisterId::AlarmSetLow => {
                self.alarms.commit_low(value).await.map_err(|_| FAILED)?;
            }
            RegisterId::DeleteAlarm => {
                self.alarms.delete(value as u8).await.map_err(|_| FAILED)?;
            }
            RegisterId::ExecuteShortcut => {
                let shortcut = lock_within(self.registers, self.lock_timeout)
                    .await
                    .map_err(|_| FAILED)?
                    .shortcut(value)
                    .ok_or(Exception::IllegalValue)?;
                self.heat.apply_shortcut(shortcut).await.map_err(|_| FAILED)?;
            }
            RegisterId::HeatingStatus => {
                let status = HeatStatus::from_register(value).ok_or(Exception::IllegalValue)?;
                self.heat.set_status(status).await.map_err(|_| FAILED)?;
            }
            RegisterId::HeatingLevel => {
                let level = HeatLevel::from_register(value).ok_or(Exception::IllegalValue)?;
                self.heat.set_level(level).await.map_err(|_| FAILED)?;
            }
            RegisterId::HeatingTimer => {
                self.heat.set_timer(value).await.map_err(|_| FAILED)?;
            }
            RegisterId::Shortcut1 | RegisterId::Shortcut2 => {}
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<DeviceStatus, Exception> {
        let state = self
            .heat
            .snapshot()
            .await
            .map_err(|_| Exception::ServerDeviceFailure)?;
        let power = lock_within(self.registers, self.lock_timeout)
            .await
            .map_err(|_| Exception::ServerDeviceFailure)?
            .get(RegisterId::PowerSwitch);
        Ok(DeviceStatus {
            power,
            status: state.status,
            level: state.level,
            timer_minutes: state.set_minutes,
            remain_sec: state.remain_sec,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::hardware::traits::RtcError;
    use core::cell::Cell;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    pub(crate) type Raw = CriticalSectionRawMutex;

    pub(crate) struct MockRtc(pub Cell<u32>);

    impl Clock for MockRtc {
        fn utc(&self) -> u32 {
            self.0.get()
        }

        fn set_utc(&self, utc: u32) -> Result<(), RtcError> {
            if utc < UTC_EPOCH_2000 {
                return Err(RtcError::BeforeEpoch);
            }
            self.0.set(utc);
            Ok(())
        }
    }

    pub(crate) struct Fixture {
        pub registers: Mutex<Raw, RegisterTable>,
        pub heat: HeatController<Raw>,
        pub alarms: AlarmScheduler<Raw>,
        pub rtc: MockRtc,
    }

    impl Fixture {
        pub fn new() -> Self {
            let timeout = Duration::from_millis(20);
            Self {
                registers: Mutex::new(RegisterTable::new()),
                heat: HeatController::new(timeout),
                alarms: AlarmScheduler::new(timeout),
                rtc: MockRtc(Cell::new(UTC_EPOCH_2000)),
            }
        }

        pub fn surface(&self) -> ControlSurface<'_, Raw, MockRtc> {
            ControlSurface::new(
                &self.registers,
                &self.heat,
                &self.alarms,
                &self.rtc,
                Duration::from_millis(20),
            )
        }
    }

    #[test]
    fn read_write_round_trip() {
        let fx = Fixture::new();
        let surface = fx.surface();
        block_on(async {
            surface.write(RegisterId::HeatingLevel.address(), &[3, 45]).await.unwrap();
            let values = surface.read(RegisterId::HeatingLevel.address(), 2).await.unwrap();
            assert_eq!(&values[..], &[3, 45]);

            surface.write_one(RegisterId::Shortcut2, 0x1401).await.unwrap();
            let values = surface.read(RegisterId::Shortcut2.address(), 1).await.unwrap();
            assert_eq!(&values[..], &[0x1401]);
        });
    }

    #[test]
    fn write_only_registers_refuse_reads() {
        let fx = Fixture::new();
        let surface = fx.surface();
        block_on(async {
            for id in RegisterId::ALL.iter().filter(|id| id.access() == Access::WriteOnly) {
                assert_eq!(surface.read(id.address(), 1).await, Err(Exception::IllegalValue));
            }
            // A span that merely touches a write-only register is refused too.
            assert_eq!(surface.read(6, 2).await, Err(Exception::IllegalValue));
        });
    }

    #[test]
    fn out_of_table_reads() {
        let fx = Fixture::new();
        let surface = fx.surface();
        block_on(async {
            assert_eq!(surface.read(11, 2).await, Err(Exception::IllegalAddress));
            assert_eq!(surface.read(40, 1).await, Err(Exception::IllegalAddress));
            assert_eq!(surface.read(7, 0).await, Err(Exception::IllegalValue));
        });
    }

    #[test]
    fn invalid_value_leaves_transaction_unapplied() {
        let fx = Fixture::new();
        let surface = fx.surface();
        block_on(async {
            // Status=1 is valid, level=7 is not.
            let result = surface.write(RegisterId::HeatingStatus.address(), &[1, 7]).await;
            assert_eq!(result, Err(Exception::IllegalValue));
            let state = fx.heat.snapshot().await.unwrap();
            assert_eq!(state.status, HeatStatus::Stopped);
            assert_eq!(surface.read(7, 2).await.unwrap()[..], [0, 1]);
        });
    }

    #[test]
    fn status_write_reaches_heat_controller() {
        let fx = Fixture::new();
        let surface = fx.surface();
        block_on(async {
            surface.write(RegisterId::HeatingStatus.address(), &[1, 2, 15]).await.unwrap();
            let state = fx.heat.snapshot().await.unwrap();
            assert!(state.is_running());
            assert_eq!(state.level, HeatLevel::L2);
            assert_eq!(state.remain_sec, 15 * 60);

            surface.write_one(RegisterId::PowerSwitch, 0).await.unwrap();
            assert!(!fx.heat.snapshot().await.unwrap().is_running());
            // The mirror follows the live state.
            assert_eq!(surface.read(7, 3).await.unwrap()[..], [0, 2, 0]);
        });
    }

    #[test]
    fn utc_needs_both_halves() {
        let fx = Fixture::new();
        let surface = fx.surface();
        let utc: u32 = 1_700_000_000;
        let (high, low) = ((utc >> 16) as u16, utc as u16);
        block_on(async {
            assert_eq!(
                surface.write_one(RegisterId::UtcHigh, high).await,
                Err(Exception::IllegalValue)
            );
            assert_eq!(fx.rtc.utc(), UTC_EPOCH_2000);

            surface.write(RegisterId::UtcHigh.address(), &[high, low]).await.unwrap();
            assert_eq!(fx.rtc.utc(), utc);

            // 1999-12-31T23:59:59Z
            let early = UTC_EPOCH_2000 - 1;
            let result = surface
                .write(RegisterId::UtcHigh.address(), &[(early >> 16) as u16, early as u16])
                .await;
            assert_eq!(result, Err(Exception::IllegalValue));
            assert_eq!(fx.rtc.utc(), utc);
        });
    }

    #[test]
    fn alarm_halves_in_one_or_two_writes() {
        let fx = Fixture::new();
        let surface = fx.surface();
        let mut alarm = Alarm::disabled(6);
        alarm.enabled = true;
        alarm.hour = 21;
        alarm.minute = 5;
        alarm.weekday_mask = 0b0111110;
        let (high, low) = alarm.encode();
        block_on(async {
            surface.write(RegisterId::AlarmSetHigh.address(), &[high, low]).await.unwrap();
            assert_eq!(fx.alarms.get(6).await.unwrap(), alarm);

            surface.write_one(RegisterId::DeleteAlarm, 6).await.unwrap();
            assert!(!fx.alarms.get(6).await.unwrap().enabled);

            surface.write_one(RegisterId::AlarmSetHigh, high).await.unwrap();
            surface.write_one(RegisterId::AlarmSetLow, low).await.unwrap();
            assert_eq!(fx.alarms.get(6).await.unwrap(), alarm);

            // Hour 25 in the high half.
            let bad_high = (6 << 11) | (25 << 6);
            assert_eq!(
                surface.write(RegisterId::AlarmSetHigh.address(), &[bad_high, low]).await,
                Err(Exception::IllegalValue)
            );
            assert_eq!(
                surface.write_one(RegisterId::DeleteAlarm, 32).await,
                Err(Exception::IllegalValue)
            );
        });
    }

    #[test]
    fn execute_shortcut() {
        let fx = Fixture::new();
        let surface = fx.surface();
        block_on(async {
            assert_eq!(
                surface.write_one(RegisterId::ExecuteShortcut, 3).await,
                Err(Exception::IllegalValue)
            );
            surface.write_one(RegisterId::ExecuteShortcut, 1).await.unwrap();
            let status = surface.status().await.unwrap();
            assert_eq!(status.status, HeatStatus::Running);
            assert_eq!(status.level, HeatLevel::L2);
            assert_eq!(status.timer_minutes, 30);
            assert_eq!(status.remain_sec, 1800);
            assert_eq!(status.power, 1);
        });
    }
}
