//! NTC thermistor read through a voltage divider on an ADC channel.
//!
//! The ADC task pushes raw samples into a [`SampleWindow`]; the control loop reads the
//! median of the last few through [`NtcSensor`].

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use num_traits::Float;

use super::traits::{SensorError, TemperatureSensor};
use crate::config::Config;

/// Samples the median filter looks at.
pub const NTC_SAMPLES: usize = 5;

const KELVIN_OFFSET: f32 = 273.15;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NtcParams {
    /// Resistance at `nominal_celsius`.
    pub nominal_ohms: f32,
    pub nominal_celsius: f32,
    pub beta: f32,
    pub series_ohms: f32,
    /// Full-scale ADC reading.
    pub adc_max: u16,
}

impl NtcParams {
    /// 10 kΩ / B3950 part against a 10 kΩ series resistor, 12-bit ADC.
    pub const PAD: Self = Self {
        nominal_ohms: 10_000.0,
        nominal_celsius: 25.0,
        beta: 3950.0,
        series_ohms: 10_000.0,
        adc_max: 4095,
    };

    /// Beta-equation conversion of one raw reading.
    ///
    /// Rail readings (0 or full scale) mean an open or shorted divider.
    pub fn celsius(&self, raw: u16) -> Result<f32, SensorError> {
        if raw == 0 || raw >= self.adc_max {
            return Err(SensorError::Adc);
        }
        let ohms = self.series_ohms * (f32::from(self.adc_max) / f32::from(raw) - 1.0);
        let t0 = self.nominal_celsius + KELVIN_OFFSET;
        let kelvin = 1.0 / (1.0 / t0 + Float::ln(ohms / self.nominal_ohms) / self.beta);
        Ok(kelvin - KELVIN_OFFSET)
    }
}

pub fn median<const N: usize>(mut samples: [u16; N]) -> u16 {
    samples.sort_unstable();
    samples.get(N / 2).copied().unwrap_or(0)
}

struct Window<const N: usize> {
    samples: [u16; N],
    next: usize,
    filled: bool,
}

/// Ring of the latest raw samples, shared between the ADC task and the control loop.
pub struct SampleWindow<M: RawMutex, const N: usize> {
    inner: Mutex<M, RefCell<Window<N>>>,
}

impl<M: RawMutex, const N: usize> SampleWindow<M, N> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Window {
                samples: [0; N],
                next: 0,
                filled: false,
            })),
        }
    }

    pub fn push(&self, raw: u16) {
        self.inner.lock(|w| {
            let mut w = w.borrow_mut();
            let next = w.next;
            w.samples[next] = raw;
            w.next = (next + 1) % N;
            if w.next == 0 {
                w.filled = true;
            }
        });
    }

    /// The last `N` samples, once that many have arrived.
    pub fn snapshot(&self) -> Option<[u16; N]> {
        self.inner.lock(|w| {
            let w = w.borrow();
            w.filled.then_some(w.samples)
        })
    }
}

impl<M: RawMutex, const N: usize> Default for SampleWindow<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct NtcSensor<'a, M: RawMutex, const N: usize> {
    window: &'a SampleWindow<M, N>,
    params: NtcParams,
    min_celsius: f32,
    max_celsius: f32,
}

impl<'a, M: RawMutex, const N: usize> NtcSensor<'a, M, N> {
    pub fn new(window: &'a SampleWindow<M, N>, params: NtcParams, config: &Config) -> Self {
        Self {
            window,
            params,
            min_celsius: config.sensor_min_celsius,
            max_celsius: config.sensor_max_celsius,
        }
    }
}

impl<M: RawMutex, const N: usize> TemperatureSensor for NtcSensor<'_, M, N> {
    fn read_celsius(&mut self) -> Result<f32, SensorError> {
        let samples = self.window.snapshot().ok_or(SensorError::Adc)?;
        let celsius = self.params.celsius(median(samples))?;
        if !(self.min_celsius..=self.max_celsius).contains(&celsius) {
            debug!("ntc: {} C out of range", celsius);
            return Err(SensorError::OutOfRange);
        }
        Ok(celsius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    type Window = SampleWindow<CriticalSectionRawMutex, NTC_SAMPLES>;

    #[test]
    fn midpoint_is_nominal_temperature() {
        let celsius = NtcParams::PAD.celsius(2048).unwrap();
        assert!((celsius - 25.0).abs() < 0.1, "{}", celsius);
    }

    #[test]
    fn higher_reading_is_hotter() {
        let warm = NtcParams::PAD.celsius(3500).unwrap();
        assert!((warm - 71.0).abs() < 1.0, "{}", warm);
        assert!(NtcParams::PAD.celsius(1000).unwrap() < 25.0);
    }

    #[test]
    fn rail_readings_are_faults() {
        assert_eq!(NtcParams::PAD.celsius(0), Err(SensorError::Adc));
        assert_eq!(NtcParams::PAD.celsius(4095), Err(SensorError::Adc));
    }

    #[test]
    fn median_ignores_a_spike() {
        assert_eq!(median([2000, 4095, 2010, 1990, 2005]), 2005);
    }

    #[test]
    fn sensor_needs_a_full_window() {
        let window = Window::new();
        let mut sensor = NtcSensor::new(&window, NtcParams::PAD, &Config::DEFAULT);
        for _ in 0..NTC_SAMPLES - 1 {
            window.push(2048);
        }
        assert_eq!(sensor.read_celsius(), Err(SensorError::Adc));
        window.push(2048);
        assert!(sensor.read_celsius().is_ok());
    }

    #[test]
    fn implausible_temperature_is_rejected() {
        let window = Window::new();
        let mut sensor = NtcSensor::new(&window, NtcParams::PAD, &Config::DEFAULT);
        for raw in [3900, 3900, 3900, 100, 3900] {
            window.push(raw);
        }
        assert_eq!(sensor.read_celsius(), Err(SensorError::OutOfRange));
    }
}
