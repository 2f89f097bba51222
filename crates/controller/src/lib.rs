use std::time::Instant;

/// Length of the derivative averaging window.
pub const DERIVATIVE_WINDOW: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PidConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub out_min: f64,
    pub out_max: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 0.059,
            ki: 0.050,
            kd: 0.035,
            out_min: 101.0,
            out_max: 107.0,
        }
    }
}

impl PidConfig {
    pub fn is_valid(&self) -> bool {
        self.out_min <= self.out_max
    }
}

/// Result of one regulator step. `i_term` is the integral accumulator after clamping.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PidOutput {
    pub output: f64,
    pub p_term: f64,
    pub i_term: f64,
    pub d_term: f64,
}

#[derive(Clone, Debug)]
pub struct PidState {
    pub last_input: f64,
    pub last_time: Option<Instant>,
    pub integral: f64,
    pub derivative_history: [f64; DERIVATIVE_WINDOW],
    pub history_index: usize,
    pub last_output: PidOutput,
}

impl PidState {
    fn seeded(integral: f64) -> Self {
        Self {
            last_input: 0.0,
            last_time: None,
            integral,
            derivative_history: [0.0; DERIVATIVE_WINDOW],
            history_index: 0,
            last_output: PidOutput {
                output: integral,
                i_term: integral,
                ..PidOutput::default()
            },
        }
    }

    fn derivative_average(&self) -> f64 {
        self.derivative_history.iter().sum::<f64>() / DERIVATIVE_WINDOW as f64
    }
}

#[derive(Clone, Debug)]
pub struct Pid {
    cfg: PidConfig,
    setpoint: f64,
    state: PidState,
}

impl Pid {
    /// The integral starts at `out_max`, the "no corrective power" end of the servo range.
    /// An inverted `cfg` is replaced by the default configuration.
    pub fn new(cfg: PidConfig) -> Self {
        let cfg = if cfg.is_valid() { cfg } else { PidConfig::default() };
        Self {
            cfg,
            setpoint: 0.0,
            state: PidState::seeded(cfg.out_max),
        }
    }

    pub fn config(&self) -> &PidConfig {
        &self.cfg
    }

    pub fn state(&self) -> &PidState {
        &self.state
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn set_setpoint(&mut self, value: f64) {
        self.setpoint = value;
    }

    /// Apply new gains and bounds. Returns `false` and keeps the previous
    /// configuration when `out_min > out_max`.
    pub fn configure(&mut self, cfg: PidConfig) -> bool {
        if !cfg.is_valid() {
            return false;
        }
        self.cfg = cfg;
        if self.state.last_time.is_none() {
            self.state = PidState::seeded(cfg.out_max);
        } else {
            self.state.integral = self.state.integral.clamp(cfg.out_min, cfg.out_max);
            let last = &mut self.state.last_output;
            last.output = last.output.clamp(cfg.out_min, cfg.out_max);
        }
        true
    }

    pub fn reset(&mut self) {
        self.state = PidState::seeded(self.cfg.out_max);
    }

    /// Step against the regulator's own setpoint.
    pub fn update(&mut self, input: f64, now: Instant) -> PidOutput {
        self.compute(input, self.setpoint, now)
    }

    /// Step the regulator for measurement `input` at time `now`.
    ///
    /// The derivative acts on the measurement, not the error, so a setpoint step
    /// does not kick the output. When no time has passed since the previous call
    /// the derivative contribution is skipped for this call. A non-finite `input`
    /// or `setpoint` leaves the state untouched and repeats the previous output.
    pub fn compute(&mut self, input: f64, setpoint: f64, now: Instant) -> PidOutput {
        if !input.is_finite() || !setpoint.is_finite() {
            return self.state.last_output;
        }
        let (lo, hi) = (self.cfg.out_min, self.cfg.out_max);

        let last_time = match self.state.last_time {
            Some(t) => t,
            None => {
                self.state.last_input = input;
                now
            }
        };
        let dt = now.saturating_duration_since(last_time).as_secs_f64();

        let error = setpoint - input;
        let p_term = self.cfg.kp * error;

        self.state.integral += self.cfg.ki * error * dt;
        self.state.integral = self.state.integral.clamp(lo, hi);

        let d_term = if dt > 0.0 {
            let d_input = (input - self.state.last_input) / dt;
            let idx = self.state.history_index;
            self.state.derivative_history[idx] = -self.cfg.kd * d_input;
            self.state.history_index = (idx + 1) % DERIVATIVE_WINDOW;
            self.state.derivative_average()
        } else {
            0.0
        };

        let output = (p_term + self.state.integral + d_term).clamp(lo, hi);

        self.state.last_input = input;
        self.state.last_time = Some(now.max(last_time));
        self.state.last_output = PidOutput {
            output,
            p_term,
            i_term: self.state.integral,
            d_term,
        };
        self.state.last_output
    }
}
