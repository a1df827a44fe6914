//! Heating controller: state machine, timer coordination and the PID control step.
//!
//! `HeatState` transitions are pure and return the [`TimerCommand`] the two timer tasks must
//! follow. Timer tasks never touch the state; they post a [`HeatEvent`] which the control task
//! applies under the state lock before its next iteration.
//!
//! Every arm starts a new generation. Timer messages carry the generation they were armed
//! with, so messages still queued from an earlier arm are dropped.

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Ticker, Timer};

use crate::config::{Config, HEAT_QUEUE_DEPTH};
use crate::hardware::traits::{Heater, TemperatureSensor};
use crate::pid::Pid;
use crate::registers::{MAX_TIMER_MINUTES, ShortcutConfig};
use crate::sync::{LockTimeout, lock_within};

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeatStatus {
    Stopped = 0,
    Running = 1,
}

impl HeatStatus {
    pub fn from_register(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Stopped),
            1 => Some(Self::Running),
            _ => None,
        }
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeatLevel {
    L1 = 1,
    L2 = 2,
    L3 = 3,
}

impl HeatLevel {
    pub fn from_register(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::L1),
            2 => Some(Self::L2),
            3 => Some(Self::L3),
            _ => None,
        }
    }

    pub fn target_celsius(self) -> f32 {
        match self {
            Self::L1 => 35.0,
            Self::L2 => 45.0,
            Self::L3 => 55.0,
        }
    }

    pub fn up(self) -> Self {
        match self {
            Self::L1 => Self::L2,
            Self::L2 | Self::L3 => Self::L3,
        }
    }

    pub fn down(self) -> Self {
        match self {
            Self::L1 | Self::L2 => Self::L1,
            Self::L3 => Self::L2,
        }
    }
}

/// Messages posted by the timer tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeatEvent {
    TimerExpired { generation: u32 },
    RemainUpdate { generation: u32 },
}

impl HeatEvent {
    pub fn generation(self) -> u32 {
        match self {
            Self::TimerExpired { generation } | Self::RemainUpdate { generation } => generation,
        }
    }
}

/// Instruction for the shutoff timer and the remaining-time ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerCommand {
    /// (Re)start both timers; the shutoff timer fires after `shutoff`.
    Arm { shutoff: Duration, generation: u32 },
    Disarm,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HeatState {
    pub status: HeatStatus,
    pub level: HeatLevel,
    pub target_celsius: f32,
    /// Configured duration; 0 means run until stopped.
    pub set_minutes: u16,
    pub remain_sec: u32,
    /// Whether the timers are currently armed.
    pub armed: bool,
    /// Bumped on every arm.
    pub generation: u32,
}

impl HeatState {
    pub const fn new() -> Self {
        Self {
            status: HeatStatus::Stopped,
            level: HeatLevel::L1,
            target_celsius: 35.0,
            set_minutes: 0,
            remain_sec: 0,
            armed: false,
            generation: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == HeatStatus::Running
    }

    fn arm(&mut self) -> TimerCommand {
        self.remain_sec = u32::from(self.set_minutes) * 60;
        self.armed = true;
        self.generation = self.generation.wrapping_add(1);
        TimerCommand::Arm {
            shutoff: Duration::from_secs(u64::from(self.remain_sec)),
            generation: self.generation,
        }
    }

    fn stop(&mut self) -> TimerCommand {
        self.status = HeatStatus::Stopped;
        self.set_minutes = 0;
        self.remain_sec = 0;
        self.armed = false;
        TimerCommand::Disarm
    }

    pub fn set_status(&mut self, status: HeatStatus) -> Option<TimerCommand> {
        match status {
            HeatStatus::Stopped => Some(self.stop()),
            HeatStatus::Running => {
                self.status = HeatStatus::Running;
                if self.set_minutes > 0 {
                    Some(self.arm())
                } else {
                    self.remain_sec = 0;
                    None
                }
            }
        }
    }

    /// Stores the duration and resets the remaining time; re-arms the timers when already
    /// running.
    pub fn set_timer(&mut self, minutes: u16) -> Option<TimerCommand> {
        self.set_minutes = minutes.min(MAX_TIMER_MINUTES);
        self.remain_sec = u32::from(self.set_minutes) * 60;
        if !self.is_running() {
            return None;
        }
        if self.set_minutes > 0 {
            Some(self.arm())
        } else {
            self.armed = false;
            Some(TimerCommand::Disarm)
        }
    }

    pub fn set_level(&mut self, level: HeatLevel) {
        self.level = level;
        self.target_celsius = level.target_celsius();
    }

    pub fn on_event(&mut self, event: HeatEvent) -> Option<TimerCommand> {
        // Left over from a disarmed timer or an earlier arm.
        if !self.armed || event.generation() != self.generation {
            trace!("heat: stale timer message {}", event);
            return None;
        }
        match event {
            HeatEvent::TimerExpired { .. } => Some(self.stop()),
            HeatEvent::RemainUpdate { .. } => {
                self.remain_sec = self.remain_sec.saturating_sub(1);
                if self.remain_sec == 0 {
                    Some(self.stop())
                } else {
                    None
                }
            }
        }
    }
}

impl Default for HeatState {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared heating state plus the plumbing to its timer tasks.
pub struct HeatController<M: RawMutex> {
    state: Mutex<M, HeatState>,
    events: Channel<M, HeatEvent, HEAT_QUEUE_DEPTH>,
    shutoff: Signal<M, TimerCommand>,
    ticker: Signal<M, TimerCommand>,
    lock_timeout: Duration,
}

impl<M: RawMutex> HeatController<M> {
    pub const fn new(lock_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(HeatState::new()),
            events: Channel::new(),
            shutoff: Signal::new(),
            ticker: Signal::new(),
            lock_timeout,
        }
    }

    async fn update<R>(
        &self,
        f: impl FnOnce(&mut HeatState) -> (R, Option<TimerCommand>),
    ) -> Result<R, LockTimeout> {
        let (result, command, snapshot) = {
            let mut state = lock_within(&self.state, self.lock_timeout).await?;
            let (result, command) = f(&mut *state);
            (result, command, *state)
        };
        if let Some(command) = command {
            self.command_timers(command);
        }
        info!(
            "heat: status={} level={} timer={}min remain={}s",
            snapshot.status as u16,
            snapshot.level as u16,
            snapshot.set_minutes,
            snapshot.remain_sec
        );
        Ok(result)
    }

    fn command_timers(&self, command: TimerCommand) {
        self.shutoff.signal(command);
        self.ticker.signal(command);
    }

    pub async fn set_status(&self, status: HeatStatus) -> Result<(), LockTimeout> {
        self.update(|s| ((), s.set_status(status))).await
    }

    /// Flips between running and stopped; returns the new status.
    pub async fn toggle(&self) -> Result<HeatStatus, LockTimeout> {
        self.update(|s| {
            let next = if s.is_running() {
                HeatStatus::Stopped
            } else {
                HeatStatus::Running
            };
            (next, s.set_status(next))
        })
        .await
    }

    pub async fn set_level(&self, level: HeatLevel) -> Result<(), LockTimeout> {
        self.update(|s| {
            s.set_level(level);
            ((), None)
        })
        .await
    }

    pub async fn level_up(&self) -> Result<HeatLevel, LockTimeout> {
        self.update(|s| {
            s.set_level(s.level.up());
            (s.level, None)
        })
        .await
    }

    pub async fn level_down(&self) -> Result<HeatLevel, LockTimeout> {
        self.update(|s| {
            s.set_level(s.level.down());
            (s.level, None)
        })
        .await
    }

    pub async fn set_timer(&self, minutes: u16) -> Result<(), LockTimeout> {
        self.update(|s| ((), s.set_timer(minutes))).await
    }

    /// Sets level and duration from a stored shortcut, then starts heating.
    pub async fn apply_shortcut(&self, shortcut: ShortcutConfig) -> Result<(), LockTimeout> {
        let level = HeatLevel::from_register(u16::from(shortcut.level)).unwrap_or(HeatLevel::L1);
        self.update(|s| {
            s.set_level(level);
            s.set_minutes = u16::from(shortcut.minutes).min(MAX_TIMER_MINUTES);
            ((), s.set_status(HeatStatus::Running))
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<HeatState, LockTimeout> {
        Ok(*lock_within(&self.state, self.lock_timeout).await?)
    }

    /// Queues a timer message without waiting; a full queue drops it.
    ///
    /// The timer tasks wait for room instead.
    pub fn post(&self, event: HeatEvent) {
        if self.events.try_send(event).is_err() {
            warn!("heat: message queue full, dropped {}", event);
        }
    }

    /// One control iteration: apply at most one pending timer message, then drive the heater.
    pub async fn control_step(
        &self,
        pid: &mut Pid,
        sensor: &mut impl TemperatureSensor,
        heater: &mut impl Heater,
        config: &Config,
    ) {
        let snapshot = match lock_within(&self.state, self.lock_timeout).await {
            Ok(mut state) => {
                let command = match self.events.try_receive() {
                    Ok(event) => state.on_event(event),
                    Err(_) => None,
                };
                let snapshot = *state;
                drop(state);
                if let Some(command) = command {
                    info!("heat: timer ended, heating stopped");
                    self.command_timers(command);
                }
                snapshot
            }
            Err(LockTimeout) => {
                heater.off();
                return;
            }
        };

        if !snapshot.is_running() {
            heater.off();
            return;
        }

        let measured = match sensor.read_celsius() {
            Ok(celsius) if config.temperature_plausible(celsius) => celsius,
            Ok(_) | Err(_) => {
                warn!("heat: temperature unavailable, heater off");
                pid.reset();
                heater.off();
                return;
            }
        };

        let output = pid.update(measured, snapshot.target_celsius, config.control_dt());
        if output > 0.0 {
            heater.set_power(output);
        } else {
            heater.off();
        }
        trace!("heat: {} C -> {}%", measured, output);
    }

    pub async fn run_control(
        &self,
        mut pid: Pid,
        mut sensor: impl TemperatureSensor,
        mut heater: impl Heater,
        config: Config,
    ) -> ! {
        let mut ticker = Ticker::every(config.control_period);
        loop {
            self.control_step(&mut pid, &mut sensor, &mut heater, &config).await;
            ticker.next().await;
        }
    }

    /// One-shot shutoff timer. Posts [`HeatEvent::TimerExpired`] when it runs out.
    pub async fn run_shutoff_timer(&self) -> ! {
        let mut command = self.shutoff.wait().await;
        loop {
            command = match command {
                TimerCommand::Disarm => self.shutoff.wait().await,
                TimerCommand::Arm {
                    shutoff,
                    generation,
                } => match select(Timer::after(shutoff), self.shutoff.wait()).await {
                    Either::First(()) => {
                        self.events.send(HeatEvent::TimerExpired { generation }).await;
                        TimerCommand::Disarm
                    }
                    Either::Second(next) => next,
                },
            };
        }
    }

    /// Periodic ticker posting [`HeatEvent::RemainUpdate`] while armed.
    pub async fn run_remain_ticker(&self, period: Duration) -> ! {
        let mut command = self.ticker.wait().await;
        loop {
            command = match command {
                TimerCommand::Disarm => self.ticker.wait().await,
                TimerCommand::Arm { generation, .. } => {
                    let mut ticker = Ticker::every(period);
                    loop {
                        match select(ticker.next(), self.ticker.wait()).await {
                            Either::First(()) => {
                                self.events.send(HeatEvent::RemainUpdate { generation }).await
                            }
                            Either::Second(next) => break next,
                        }
                    }
                }
            };
        }
    }
}
