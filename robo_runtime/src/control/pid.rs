//! Discrete PID controller with setpoint feedforward and output clamping.
//!
//! Runs once per call with no time base: the integral is the plain sum of
//! errors, the derivative is the error delta since the previous call. Tune
//! gains for the rate the owning action ticks at.

/// Integral accumulator and previous error.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidState {
    integral: f64,
    prev_error: f64,
}

impl PidState {
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }
}

/// Controller gains. Zero disables a term.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Feedforward on the setpoint.
    pub kf: f64,
}

/// One control step, unclamped.
#[inline]
pub fn pid_compute(state: &mut PidState, gains: &PidGains, setpoint: f64, measurement: f64) -> f64 {
    let error = setpoint - measurement;
    state.integral += error;
    let derivative = error - state.prev_error;
    state.prev_error = error;

    gains.kf * setpoint + gains.kp * error + gains.ki * state.integral + gains.kd * derivative
}

/// PID controller with a stored setpoint and output limits.
#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    min: f64,
    max: f64,
    setpoint: f64,
    state: PidState,
}

impl Pid {
    pub fn new(gains: PidGains, min: f64, max: f64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            gains,
            min,
            max,
            setpoint: 0.0,
            state: PidState::default(),
        }
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    pub fn set_kp(&mut self, kp: f64) {
        self.gains.kp = kp;
    }

    pub fn set_ki(&mut self, ki: f64) {
        self.gains.ki = ki;
    }

    pub fn set_kd(&mut self, kd: f64) {
        self.gains.kd = kd;
    }

    pub fn set_kf(&mut self, kf: f64) {
        self.gains.kf = kf;
    }

    pub fn limits(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    pub fn set_limits(&mut self, min: f64, max: f64) {
        (self.min, self.max) = if min <= max { (min, max) } else { (max, min) };
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    pub fn state(&self) -> &PidState {
        &self.state
    }

    /// Clear the integral and derivative history.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Next output for the process value `pv`, clamped to the limits.
    pub fn get_output(&mut self, pv: f64) -> f64 {
        pid_compute(&mut self.state, &self.gains, self.setpoint, pv).clamp(self.min, self.max)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
