//! Fixed-cadence regulation loop.
//!
//! Each tick reads the raw position, smooths it, runs the PID regulator against
//! the setpoint currently held in [`RunState`], sends the command to the
//! actuator and commits the sample for the other contexts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use controller::{Pid, PidConfig, PidOutput};
use filter::{FilterConfig, NoiseFilter};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::device::{Actuator, PositionSensor};
use crate::error::LoopError;
use crate::state::RunState;

#[derive(Clone, Debug)]
pub struct LoopConfig {
    pub period: Duration,
    pub pid: PidConfig,
    pub filter: FilterConfig,
    /// Command sent once on the way out. Defaults to the "no thrust" end of the servo.
    pub neutral_command: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        let pid = PidConfig::default();
        Self {
            period: Duration::from_millis(20),
            pid,
            filter: FilterConfig::default(),
            neutral_command: pid.out_max,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LoopReport {
    pub ticks: u64,
    pub overruns: u64,
    pub max_tick: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickSample {
    pub raw: u16,
    pub filtered: f64,
    pub pid: PidOutput,
    pub elapsed: f64,
}

pub struct ControlLoop {
    cfg: LoopConfig,
    filter: NoiseFilter,
    pid: Pid,
    sensor: Box<dyn PositionSensor>,
    actuator: Box<dyn Actuator>,
    clock: Arc<dyn Clock>,
    phase: LoopPhase,
    started_at: Option<Instant>,
    report: LoopReport,
}

impl ControlLoop {
    pub fn new(
        cfg: LoopConfig,
        sensor: Box<dyn PositionSensor>,
        actuator: Box<dyn Actuator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        if !cfg.pid.is_valid() {
            warn!(pid = ?cfg.pid, "inverted output bounds, using default regulator configuration");
        }
        Self {
            filter: NoiseFilter::new(cfg.filter),
            pid: Pid::new(cfg.pid),
            cfg,
            sensor,
            actuator,
            clock,
            phase: LoopPhase::Idle,
            started_at: None,
            report: LoopReport::default(),
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn config(&self) -> &LoopConfig {
        &self.cfg
    }

    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    pub fn filter(&self) -> &NoiseFilter {
        &self.filter
    }

    pub fn report(&self) -> LoopReport {
        self.report
    }

    fn expect_phase(&self, expected: LoopPhase) -> Result<(), LoopError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(LoopError::InvalidPhase {
                actual: self.phase,
                expected,
            })
        }
    }

    /// Take one reading to seed the filter and return the vessel's start point.
    pub fn calibrate(&mut self) -> Result<f64, LoopError> {
        self.expect_phase(LoopPhase::Idle)?;
        let raw = self.sensor.read_raw_position().map_err(LoopError::Sensor)?;
        let start = self.filter.read(f64::from(raw));
        info!(raw, start, "calibrated start point");
        Ok(start)
    }

    /// Idle -> Running. Elapsed time is measured from here.
    pub fn start(&mut self) -> Result<(), LoopError> {
        self.expect_phase(LoopPhase::Idle)?;
        self.started_at = Some(self.clock.now());
        self.phase = LoopPhase::Running;
        info!(period = ?self.cfg.period, pid = ?self.cfg.pid, "control loop running");
        Ok(())
    }

    /// One iteration without any sleeping. Nothing is sent if the read fails.
    pub fn tick(&mut self, state: &RunState) -> Result<TickSample, LoopError> {
        self.expect_phase(LoopPhase::Running)?;

        let raw = self.sensor.read_raw_position().map_err(LoopError::Sensor)?;
        let now = self.clock.now();
        let filtered = self.filter.read(f64::from(raw));
        let pid = self.pid.compute(filtered, state.setpoint(), now);

        self.actuator
            .set_position(pid.output)
            .map_err(LoopError::Actuator)?;

        let elapsed = self
            .started_at
            .map(|t| now.saturating_duration_since(t).as_secs_f64())
            .unwrap_or(0.0);
        state.write_control_sample(filtered, pid.output, pid, elapsed);
        self.report.ticks += 1;

        debug!(raw, filtered, servo = pid.output, elapsed, "tick");

        Ok(TickSample {
            raw,
            filtered,
            pid,
            elapsed,
        })
    }

    /// Send the neutral command and release both devices. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.phase == LoopPhase::Stopped {
            return;
        }
        self.phase = LoopPhase::Stopping;

        if let Err(e) = self.actuator.set_position(self.cfg.neutral_command) {
            warn!(error = %e, "failed to send neutral command");
        }
        self.actuator.release();
        self.sensor.release();

        self.phase = LoopPhase::Stopped;
        info!(
            ticks = self.report.ticks,
            overruns = self.report.overruns,
            "control loop stopped"
        );
    }

    /// Run at the configured cadence until `state` stops running or a device fails.
    ///
    /// A device failure also requests shutdown on `state` so the other contexts wind down.
    pub fn run(&mut self, state: &RunState) -> Result<LoopReport, LoopError> {
        self.start()?;

        let period = self.cfg.period;
        let mut next = Instant::now() + period;

        let result = loop {
            if !state.running() {
                break Ok(());
            }

            let now = Instant::now();
            if let Some(wait) = next.checked_duration_since(now) {
                if state.shutdown_signal().wait_timeout(wait) {
                    break Ok(());
                }
            }

            let tick_start = Instant::now();
            if let Err(e) = self.tick(state) {
                error!(error = %e, "control loop failed");
                state.request_shutdown();
                break Err(e);
            }
            let busy = tick_start.elapsed();
            self.report.max_tick = self.report.max_tick.max(busy);

            next += period;
            let now = Instant::now();
            if now > next {
                self.report.overruns += 1;
                warn!(late = ?(now - next), "control loop overrun");
                next = now;
            }
        };

        self.stop();
        result.map(|()| self.report)
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        if self.phase == LoopPhase::Running {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, MonotonicClock};
    use crate::error::DeviceError;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::thread;

    struct ScriptedSensor {
        readings: VecDeque<Result<u16, DeviceError>>,
        fallback: u16,
        released: Arc<Mutex<bool>>,
    }

    impl ScriptedSensor {
        fn constant(value: u16) -> Self {
            Self {
                readings: VecDeque::new(),
                fallback: value,
                released: Arc::new(Mutex::new(false)),
            }
        }
    }

    impl PositionSensor for ScriptedSensor {
        fn read_raw_position(&mut self) -> Result<u16, DeviceError> {
            self.readings.pop_front().unwrap_or(Ok(self.fallback))
        }

        fn release(&mut self) {
            *self.released.lock() = true;
        }
    }

    #[derive(Clone, Default)]
    struct RecordingActuator {
        commands: Arc<Mutex<Vec<f64>>>,
        released: Arc<Mutex<bool>>,
    }

    impl Actuator for RecordingActuator {
        fn set_position(&mut self, command: f64) -> Result<(), DeviceError> {
            self.commands.lock().push(command);
            Ok(())
        }

        fn release(&mut self) {
            *self.released.lock() = true;
        }
    }

    fn fast_config() -> LoopConfig {
        LoopConfig {
            period: Duration::from_millis(1),
            ..LoopConfig::default()
        }
    }

    #[test]
    fn tick_requires_running_phase() {
        let state = RunState::new(480.0, 420.0, 270.0);
        let mut cl = ControlLoop::new(
            LoopConfig::default(),
            Box::new(ScriptedSensor::constant(480)),
            Box::new(RecordingActuator::default()),
            Arc::new(MonotonicClock),
        );
        assert!(matches!(
            cl.tick(&state),
            Err(LoopError::InvalidPhase {
                actual: LoopPhase::Idle,
                expected: LoopPhase::Running
            })
        ));
    }

    #[test]
    fn ticks_commit_samples_with_manual_clock() {
        let clock = Arc::new(ManualClock::new());
        let actuator = RecordingActuator::default();
        let mut cl = ControlLoop::new(
            LoopConfig::default(),
            Box::new(ScriptedSensor::constant(480)),
            Box::new(actuator.clone()),
            clock.clone(),
        );

        let start = cl.calibrate().unwrap();
        assert_eq!(start, 480.0);
        let state = RunState::new(start, start - 60.0, 270.0);

        cl.start().unwrap();
        for _ in 0..5 {
            clock.advance(Duration::from_millis(20));
            let sample = cl.tick(&state).unwrap();
            assert_eq!(sample.raw, 480);
            assert!((101.0..=107.0).contains(&sample.pid.output));
        }

        let snap = state.snapshot();
        assert_eq!(snap.tick, 5);
        assert!((snap.time_elapsed - 0.1).abs() < 1e-9);
        assert_eq!(snap.sensor_value, 480.0);
        assert_eq!(actuator.commands.lock().len(), 5);
        // vessel sits 60 units short of the setpoint: thrust is requested
        assert!(snap.servo_value < 107.0);
    }

    #[test]
    fn shutdown_sends_neutral_and_releases_devices() {
        let state = Arc::new(RunState::new(480.0, 420.0, 270.0));
        let actuator = RecordingActuator::default();
        let sensor = ScriptedSensor::constant(480);
        let sensor_released = sensor.released.clone();

        let handle = {
            let state = state.clone();
            let actuator = actuator.clone();
            thread::spawn(move || {
                let mut cl = ControlLoop::new(
                    fast_config(),
                    Box::new(sensor),
                    Box::new(actuator),
                    Arc::new(MonotonicClock),
                );
                let report = cl.run(&state);
                (report, cl.phase())
            })
        };

        thread::sleep(Duration::from_millis(50));
        state.request_shutdown();
        let (report, phase) = handle.join().unwrap();
        let report = report.unwrap();

        assert_eq!(phase, LoopPhase::Stopped);
        assert!(report.ticks > 0);
        let commands = actuator.commands.lock();
        assert_eq!(commands.len() as u64, report.ticks + 1);
        assert_eq!(*commands.last().unwrap(), 107.0);
        assert!(*actuator.released.lock());
        assert!(*sensor_released.lock());
    }

    #[test]
    fn shutdown_interrupts_the_wait_for_the_next_tick() {
        let state = Arc::new(RunState::new(480.0, 420.0, 270.0));
        let actuator = RecordingActuator::default();

        let handle = {
            let state = state.clone();
            let actuator = actuator.clone();
            thread::spawn(move || {
                let mut cl = ControlLoop::new(
                    LoopConfig {
                        period: Duration::from_secs(10),
                        ..LoopConfig::default()
                    },
                    Box::new(ScriptedSensor::constant(480)),
                    Box::new(actuator),
                    Arc::new(MonotonicClock),
                );
                cl.run(&state)
            })
        };

        thread::sleep(Duration::from_millis(30));
        let asked = Instant::now();
        state.request_shutdown();
        let report = handle.join().unwrap().unwrap();

        assert!(asked.elapsed() < Duration::from_secs(5));
        assert_eq!(report.ticks, 0);
        assert_eq!(state.tick(), 0);
        assert_eq!(*actuator.commands.lock(), vec![107.0]);
    }

    #[test]
    fn sensor_failure_stops_loop_without_partial_command() {
        let state = RunState::new(480.0, 420.0, 270.0);
        let actuator = RecordingActuator::default();
        let mut sensor = ScriptedSensor::constant(480);
        sensor.readings = VecDeque::from(vec![
            Ok(480),
            Ok(479),
            Ok(478),
            Err(DeviceError::Disconnected("interface kit".into())),
        ]);

        let mut cl = ControlLoop::new(
            fast_config(),
            Box::new(sensor),
            Box::new(actuator.clone()),
            Arc::new(MonotonicClock),
        );

        let err = cl.run(&state).unwrap_err();
        assert!(matches!(err, LoopError::Sensor(DeviceError::Disconnected(_))));
        assert_eq!(cl.phase(), LoopPhase::Stopped);
        assert!(!state.running());
        assert_eq!(state.tick(), 3);

        let commands = actuator.commands.lock();
        assert_eq!(commands.len(), 4);
        assert_eq!(*commands.last().unwrap(), 107.0);
    }

    #[test]
    fn actuator_failure_is_fatal() {
        struct BrokenServo;
        impl Actuator for BrokenServo {
            fn set_position(&mut self, _command: f64) -> Result<(), DeviceError> {
                Err(DeviceError::Write("servo detached".into()))
            }
        }

        let state = RunState::new(480.0, 420.0, 270.0);
        let mut cl = ControlLoop::new(
            fast_config(),
            Box::new(ScriptedSensor::constant(480)),
            Box::new(BrokenServo),
            Arc::new(MonotonicClock),
        );

        let err = cl.run(&state).unwrap_err();
        assert!(matches!(err, LoopError::Actuator(_)));
        assert_eq!(state.tick(), 0);
        assert!(!state.running());
    }

    #[test]
    fn run_twice_is_rejected() {
        let state = RunState::new(480.0, 420.0, 270.0);
        state.request_shutdown();
        let mut cl = ControlLoop::new(
            fast_config(),
            Box::new(ScriptedSensor::constant(480)),
            Box::new(RecordingActuator::default()),
            Arc::new(MonotonicClock),
        );
        let report = cl.run(&state).unwrap();
        assert_eq!(report.ticks, 0);
        assert!(matches!(
            cl.run(&state),
            Err(LoopError::InvalidPhase {
                actual: LoopPhase::Stopped,
                ..
            })
        ));
    }
}
