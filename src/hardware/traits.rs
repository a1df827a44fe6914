//! Seams between the controller logic and the board.

use chrono::{DateTime, NaiveDateTime};

use crate::keypad::Key;

pub trait Led {
    fn on(&mut self);
    fn off(&mut self);
    fn toggle(&mut self);
}

pub trait Buzzer {
    fn on(&mut self);
    fn off(&mut self);
}

/// Raw key source polled by the keypad scanner.
pub trait KeySource {
    /// Key held down right now, if any.
    fn pressed(&mut self) -> Option<Key>;
}

/// Two sources polled in order; the first held key wins.
impl<A: KeySource, B: KeySource> KeySource for (A, B) {
    fn pressed(&mut self) -> Option<Key> {
        self.0.pressed().or_else(|| self.1.pressed())
    }
}

/// Heating element driver.
pub trait Heater {
    /// Drives the element at `percent` of full power (0..=100).
    fn set_power(&mut self, percent: f32);
    fn off(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    /// No complete sample window yet, or a rail-to-rail reading.
    Adc,
    /// Converted temperature outside the credible window.
    OutOfRange,
}

pub trait TemperatureSensor {
    fn read_celsius(&mut self) -> Result<f32, SensorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RtcError {
    /// The clock cannot represent instants before 2000-01-01T00:00:00Z.
    BeforeEpoch,
}

/// Wall clock in UTC seconds.
pub trait Clock {
    fn utc(&self) -> u32;
    fn set_utc(&self, utc: u32) -> Result<(), RtcError>;

    fn now(&self) -> Option<NaiveDateTime> {
        DateTime::from_timestamp(i64::from(self.utc()), 0).map(|t| t.naive_utc())
    }
}

/// Outbound half of the serial link.
pub trait SerialLink {
    fn send(&self, bytes: &[u8]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BtCommand {
    MusicMode,
    BluetoothMode,
    PlayPause,
    Next,
    Previous,
    VolumeUp,
    VolumeDown,
}

/// Bluetooth audio module driven by the keypad.
pub trait BtModule {
    fn command(&mut self, command: BtCommand);
}
