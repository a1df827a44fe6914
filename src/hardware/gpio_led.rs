use embedded_hal::digital::{OutputPin, StatefulOutputPin};

use super::traits::{Buzzer, Led};

/// Active-low indicator LED, as wired on PC13.
pub struct GpioLed<P> {
    pin: P,
}

impl<P: StatefulOutputPin> GpioLed<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }
}

impl<P: StatefulOutputPin> Led for GpioLed<P> {
    fn on(&mut self) {
        let _ = self.pin.set_low();
    }

    fn off(&mut self) {
        let _ = self.pin.set_high();
    }

    fn toggle(&mut self) {
        let _ = self.pin.toggle();
    }
}

/// Active-high buzzer driver.
pub struct GpioBuzzer<P> {
    pin: P,
}

impl<P: OutputPin> GpioBuzzer<P> {
    /// Takes the pin and silences it.
    pub fn new(mut pin: P) -> Self {
        let _ = pin.set_low();
        Self { pin }
    }
}

impl<P: OutputPin> Buzzer for GpioBuzzer<P> {
    fn on(&mut self) {
        let _ = self.pin.set_high();
    }

    fn off(&mut self) {
        let _ = self.pin.set_low();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;

    #[derive(Default)]
    struct MockPin {
        high: bool,
    }

    impl ErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.high = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.high = true;
            Ok(())
        }
    }

    impl StatefulOutputPin for MockPin {
        fn is_set_high(&mut self) -> Result<bool, Infallible> {
            Ok(self.high)
        }

        fn is_set_low(&mut self) -> Result<bool, Infallible> {
            Ok(!self.high)
        }
    }

    #[test]
    fn led_is_active_low() {
        let mut led = GpioLed::new(MockPin::default());
        led.on();
        assert!(!led.pin.high);
        led.toggle();
        assert!(led.pin.high);
        led.off();
        assert!(led.pin.high);
    }

    #[test]
    fn buzzer_starts_silent() {
        let mut buzzer = GpioBuzzer::new(MockPin { high: true });
        assert!(!buzzer.pin.high);
        buzzer.on();
        assert!(buzzer.pin.high);
        buzzer.off();
        assert!(!buzzer.pin.high);
    }
}
