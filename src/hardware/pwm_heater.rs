use embedded_hal::pwm::SetDutyCycle;

use super::traits::Heater;

/// Heating element switched by a PWM channel.
pub struct PwmHeater<P> {
    channel: P,
}

impl<P: SetDutyCycle> PwmHeater<P> {
    /// Takes the channel with the element off.
    pub fn new(mut channel: P) -> Self {
        let _ = channel.set_duty_cycle_fully_off();
        Self { channel }
    }
}

impl<P: SetDutyCycle> Heater for PwmHeater<P> {
    fn set_power(&mut self, percent: f32) {
        // NaN casts to 0
        let permille = (percent.clamp(0.0, 100.0) * 10.0) as u16;
        let _ = self.channel.set_duty_cycle_fraction(permille, 1000);
    }

    fn off(&mut self) {
        let _ = self.channel.set_duty_cycle_fully_off();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::pwm::ErrorType;

    struct MockChannel {
        duty: u16,
    }

    impl ErrorType for MockChannel {
        type Error = Infallible;
    }

    impl SetDutyCycle for MockChannel {
        fn max_duty_cycle(&self) -> u16 {
            7200
        }

        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Infallible> {
            self.duty = duty;
            Ok(())
        }
    }

    #[test]
    fn power_maps_to_duty() {
        let mut heater = PwmHeater::new(MockChannel { duty: 100 });
        assert_eq!(heater.channel.duty, 0);

        heater.set_power(50.0);
        assert_eq!(heater.channel.duty, 3600);
        heater.set_power(250.0);
        assert_eq!(heater.channel.duty, 7200);
        heater.set_power(-3.0);
        assert_eq!(heater.channel.duty, 0);

        heater.set_power(25.0);
        heater.off();
        assert_eq!(heater.channel.duty, 0);
    }
}
