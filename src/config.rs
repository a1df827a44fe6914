//! Compile-time sizing and runtime tunables.

use embassy_time::Duration;

use crate::pid::PidGains;

/// Bytes buffered between the UART receive interrupt and the frame demultiplexer.
pub const BYTE_QUEUE_CAPACITY: usize = 256;
/// Longest text command frame, terminator included.
pub const TEXT_FRAME_MAX_LEN: usize = 100;
/// Longest register RPC frame, checksum included.
pub const RPC_FRAME_MAX_LEN: usize = 64;
/// Frames held per outbound frame queue.
pub const FRAME_QUEUE_DEPTH: usize = 5;
/// Pending timer messages held for the heating controller.
pub const HEAT_QUEUE_DEPTH: usize = 5;
/// Number of alarm slots.
pub const ALARM_COUNT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Sleep between byte queue polls when no byte is pending.
    pub demux_poll: Duration,
    /// Longest wait for room in a frame queue before the frame is dropped.
    pub frame_send_timeout: Duration,
    /// Longest wait for any shared-state lock.
    pub lock_timeout: Duration,
    /// Heating control loop period.
    pub control_period: Duration,
    /// How often the alarm checker re-reads the clock.
    pub alarm_check_interval: Duration,
    /// Remaining-time ticker period.
    pub remain_tick: Duration,
    /// Buzzer on-time when an alarm fires.
    pub alarm_beep: Duration,
    /// Keypad sampling period.
    pub key_scan_period: Duration,
    /// Hold time after which a press is reported as long.
    pub long_press: Duration,
    pub pid: PidGains,
    /// Lowest temperature the sensor can credibly report.
    pub sensor_min_celsius: f32,
    /// Highest temperature the sensor can credibly report.
    pub sensor_max_celsius: f32,
}

impl Config {
    pub const DEFAULT: Self = Self {
        demux_poll: Duration::from_millis(10),
        frame_send_timeout: Duration::from_millis(10),
        lock_timeout: Duration::from_millis(20),
        control_period: Duration::from_millis(100),
        alarm_check_interval: Duration::from_secs(10),
        remain_tick: Duration::from_secs(1),
        alarm_beep: Duration::from_millis(300),
        key_scan_period: Duration::from_millis(20),
        long_press: Duration::from_millis(2000),
        pid: PidGains::HEATER,
        sensor_min_celsius: -20.0,
        sensor_max_celsius: 100.0,
    };

    pub fn temperature_plausible(&self, celsius: f32) -> bool {
        (self.sensor_min_celsius..=self.sensor_max_celsius).contains(&celsius)
    }

    /// Consecutive held scans that make a long press.
    pub fn long_press_scans(&self) -> u32 {
        let period = self.key_scan_period.as_ticks().max(1);
        (self.long_press.as_ticks() / period) as u32
    }

    /// Control period in seconds, as the PID expects it.
    pub fn control_dt(&self) -> f32 {
        self.control_period.as_micros() as f32 / 1_000_000.0
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_window_is_inclusive() {
        let config = Config::default();
        assert!(config.temperature_plausible(-20.0));
        assert!(config.temperature_plausible(100.0));
        assert!(!config.temperature_plausible(150.0));
        assert!(!config.temperature_plausible(-20.5));
        assert!(!config.temperature_plausible(f32::NAN));
    }

    #[test]
    fn control_dt_matches_period() {
        assert_eq!(Config::DEFAULT.control_dt(), 0.1);
    }

    #[test]
    fn long_press_is_a_hundred_scans() {
        assert_eq!(Config::DEFAULT.long_press_scans(), 100);
    }
}
