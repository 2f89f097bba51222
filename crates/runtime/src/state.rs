//! Run data shared between the control, visualization and logging contexts.
//!
//! Each field group has a single writer: the control loop commits samples,
//! the operator front-end moves the setpoint and requests shutdown. Every
//! commit happens under one write lock so readers always see whole samples.

use std::time::{Duration, Instant};

use controller::PidOutput;
use parking_lot::{Condvar, Mutex, RwLock};

/// Distance the setpoint may be moved away from the start point, in sensor units.
pub const DEFAULT_TANK_WIDTH: f64 = 270.0;

/// Allowed setpoint interval. The vessel starts at `max` and travels toward `min`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TravelRange {
    pub min: f64,
    pub max: f64,
}

impl TravelRange {
    pub fn from_start(start_point: f64, tank_width: f64) -> Self {
        Self {
            min: start_point - tank_width.abs(),
            max: start_point,
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// A consistent copy of everything in [`RunState`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunSnapshot {
    pub sensor_value: f64,
    pub servo_value: f64,
    pub setpoint: f64,
    pub start_point: f64,
    pub time_elapsed: f64,
    pub running: bool,
    pub pid: PidOutput,
    /// Number of control samples committed so far.
    pub tick: u64,
}

/// Cooperative stop request. Waiters are woken as soon as it fires.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    triggered: Mutex<bool>,
    cv: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for the call that actually fired the signal.
    pub fn trigger(&self) -> bool {
        let mut triggered = self.triggered.lock();
        if *triggered {
            return false;
        }
        *triggered = true;
        self.cv.notify_all();
        true
    }

    pub fn is_triggered(&self) -> bool {
        *self.triggered.lock()
    }

    /// Sleep for up to `timeout`, returning early if the signal fires.
    /// Returns whether the signal has fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut triggered = self.triggered.lock();
        while !*triggered {
            if self.cv.wait_until(&mut triggered, deadline).timed_out() {
                break;
            }
        }
        *triggered
    }
}

#[derive(Debug)]
pub struct RunState {
    data: RwLock<RunSnapshot>,
    travel: TravelRange,
    shutdown: ShutdownSignal,
    control_done: ShutdownSignal,
}

impl RunState {
    /// Start a run with the vessel at `start_point`. The setpoint is clamped
    /// into `[start_point - tank_width, start_point]`.
    pub fn new(start_point: f64, setpoint: f64, tank_width: f64) -> Self {
        let travel = TravelRange::from_start(start_point, tank_width);
        let data = RunSnapshot {
            sensor_value: start_point,
            setpoint: travel.clamp(setpoint),
            start_point,
            running: true,
            ..RunSnapshot::default()
        };
        Self {
            data: RwLock::new(data),
            travel,
            shutdown: ShutdownSignal::new(),
            control_done: ShutdownSignal::new(),
        }
    }

    pub fn travel(&self) -> TravelRange {
        self.travel
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Commit one control sample. Only the control loop calls this.
    pub fn write_control_sample(&self, sensor: f64, servo: f64, pid: PidOutput, elapsed: f64) {
        let mut data = self.data.write();
        data.sensor_value = sensor;
        data.servo_value = servo;
        data.pid = pid;
        data.time_elapsed = data.time_elapsed.max(elapsed);
        data.tick += 1;
    }

    /// Store a new setpoint, clamped to the travel range. Returns the stored value.
    pub fn write_setpoint(&self, value: f64) -> f64 {
        let clamped = self.travel.clamp(value);
        self.data.write().setpoint = clamped;
        clamped
    }

    /// Move the setpoint by `delta` in a single commit. Returns the stored value.
    pub fn adjust_setpoint(&self, delta: f64) -> f64 {
        let mut data = self.data.write();
        data.setpoint = self.travel.clamp(data.setpoint + delta);
        data.setpoint
    }

    pub fn request_shutdown(&self) {
        if self.shutdown.trigger() {
            tracing::info!("shutdown requested");
        }
    }

    /// Called once the control context has committed its last sample.
    /// Implies a shutdown request.
    pub fn finish_control(&self) {
        self.request_shutdown();
        self.control_done.trigger();
    }

    /// No further samples will be committed.
    pub fn control_finished(&self) -> bool {
        self.control_done.is_triggered()
    }

    /// Fires on [`finish_control`](Self::finish_control).
    pub fn control_done_signal(&self) -> &ShutdownSignal {
        &self.control_done
    }

    pub fn running(&self) -> bool {
        !self.shutdown.is_triggered()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let mut snap = *self.data.read();
        snap.running = self.running();
        snap
    }

    pub fn sensor_value(&self) -> f64 {
        self.data.read().sensor_value
    }

    pub fn servo_value(&self) -> f64 {
        self.data.read().servo_value
    }

    pub fn setpoint(&self) -> f64 {
        self.data.read().setpoint
    }

    pub fn start_point(&self) -> f64 {
        self.data.read().start_point
    }

    pub fn time_elapsed(&self) -> f64 {
        self.data.read().time_elapsed
    }

    pub fn pid_output(&self) -> PidOutput {
        self.data.read().pid
    }

    pub fn tick(&self) -> u64 {
        self.data.read().tick
    }
}
