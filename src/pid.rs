/// PID tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Symmetric bound applied to the accumulated integral term.
    pub integral_limit: f32,
    pub out_min: f32,
    pub out_max: f32,
}

impl PidGains {
    /// Gains tuned for the pad heater driven at 10 Hz.
    pub const HEATER: Self = Self {
        kp: 10.0,
        ki: 0.1,
        kd: 4.5,
        integral_limit: 50.0,
        out_min: 0.0,
        out_max: 100.0,
    };
}

/// Positional PID controller with a clamped integrator.
#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    integral: f32,
    prev_error: Option<f32>,
}

impl Pid {
    pub const fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral: 0.0,
            prev_error: None,
        }
    }

    /// Runs one control iteration and returns the bounded output.
    ///
    /// `dt` is the time since the previous call in seconds.
    pub fn update(&mut self, measured: f32, target: f32, dt: f32) -> f32 {
        let g = &self.gains;
        let error = target - measured;

        self.integral = (self.integral + error * dt).clamp(-g.integral_limit, g.integral_limit);

        let derivative = match self.prev_error {
            Some(prev) if dt > 0.0 => (error - prev) / dt,
            _ => 0.0,
        };
        self.prev_error = Some(error);

        (g.kp * error + g.ki * self.integral + g.kd * derivative).clamp(g.out_min, g.out_max)
    }

    /// Drops the integrator and derivative history.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }
}
