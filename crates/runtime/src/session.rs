//! One run of the rig: calibrate, spawn the control and logging contexts, then
//! join them and render the plot once the run has stopped.
//!
//! The operator context (window or stdin) belongs to the caller, which drives
//! the setpoint and shutdown through [`Session::state`].

use std::io::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::RunConfig;
use crate::control_loop::{ControlLoop, LoopReport};
use crate::datalog::{run_logger, DataLog, LogMetadata, LogRecord};
use crate::device::{Actuator, PositionSensor};
use crate::error::{DataLogError, LoopError, SessionError};
use crate::plot::PlotRequest;
use crate::state::RunState;

/// Marks the control context finished when dropped, panics included, so the
/// logger never waits on a loop that is gone.
struct ControlDone<'a>(&'a RunState);

impl Drop for ControlDone<'_> {
    fn drop(&mut self) {
        self.0.finish_control();
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionReport {
    pub start_point: f64,
    pub control: LoopReport,
    pub rows: u64,
}

pub struct Session {
    state: Arc<RunState>,
    start_point: f64,
    control: Option<JoinHandle<Result<LoopReport, LoopError>>>,
    logger: Option<JoinHandle<Result<u64, DataLogError>>>,
    plot: Option<PlotRequest>,
}

impl Session {
    /// Start a run writing its data log to the configured path.
    pub fn start<F>(
        cfg: &RunConfig,
        sensor: Box<dyn PositionSensor>,
        actuator: Box<dyn Actuator>,
        clock: Arc<dyn Clock>,
        on_record: F,
    ) -> Result<Self, SessionError>
    where
        F: FnMut(&LogRecord) + Send + 'static,
    {
        let path = &cfg.output.log_path;
        let mut session = Self::start_with_sink(cfg, sensor, actuator, clock, on_record, |meta| {
            DataLog::create(path, meta)
        })?;
        if cfg.output.plot {
            let mut req = PlotRequest::new(path);
            req.program = cfg.output.plot_program.clone();
            req.image_path = cfg.output.plot_image.clone();
            session.plot = Some(req);
        }
        Ok(session)
    }

    /// Start a run with a caller-provided log sink. No plot is rendered.
    pub fn start_with_sink<W, F, O>(
        cfg: &RunConfig,
        sensor: Box<dyn PositionSensor>,
        actuator: Box<dyn Actuator>,
        clock: Arc<dyn Clock>,
        on_record: F,
        open: O,
    ) -> Result<Self, SessionError>
    where
        W: Write + Send + 'static,
        F: FnMut(&LogRecord) + Send + 'static,
        O: FnOnce(&LogMetadata) -> Result<DataLog<W>, DataLogError>,
    {
        let loop_cfg = cfg.loop_config();
        let period = loop_cfg.period;
        let pid = loop_cfg.pid;

        let mut control = ControlLoop::new(loop_cfg, sensor, actuator, clock);
        let start_point = control.calibrate().map_err(SessionError::Calibrate)?;
        let state = Arc::new(RunState::new(
            start_point,
            start_point + cfg.control.setpoint_offset,
            cfg.control.tank_width,
        ));

        let meta = LogMetadata {
            pid,
            start_point,
            period,
            started_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .ok()
                .map(|d| d.as_secs()),
        };
        let mut log = open(&meta)?;

        let control = {
            let shared = state.clone();
            thread::Builder::new()
                .name("control".into())
                .spawn(move || {
                    let _done = ControlDone(&shared);
                    control.run(&shared)
                })
                .map_err(SessionError::Spawn)?
        };

        let logger = {
            let shared = state.clone();
            let log_period = cfg.log_period();
            let spawned = thread::Builder::new().name("logger".into()).spawn(move || {
                run_logger(&shared, log_period, &mut log, on_record)
            });
            match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    state.request_shutdown();
                    let _ = control.join();
                    return Err(SessionError::Spawn(e));
                }
            }
        };

        info!(
            start_point,
            setpoint = state.setpoint(),
            "session started"
        );

        Ok(Self {
            state,
            start_point,
            control: Some(control),
            logger: Some(logger),
            plot: None,
        })
    }

    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    pub fn start_point(&self) -> f64 {
        self.start_point
    }

    /// Both worker contexts have exited.
    pub fn is_finished(&self) -> bool {
        self.control.as_ref().map_or(true, |h| h.is_finished())
            && self.logger.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Request shutdown, then [`finish`](Self::finish).
    pub fn shutdown(self) -> Result<SessionReport, SessionError> {
        self.state.request_shutdown();
        self.finish()
    }

    /// Wait for the run to stop on its own, join the workers and render the plot.
    ///
    /// The plot is attempted even when the control loop failed; a plot failure
    /// is only logged.
    pub fn finish(mut self) -> Result<SessionReport, SessionError> {
        let control = self
            .control
            .take()
            .map(|h| h.join().map_err(|_| SessionError::Panicked("control")))
            .unwrap_or(Err(SessionError::Panicked("control")));
        let rows = self
            .logger
            .take()
            .map(|h| h.join().map_err(|_| SessionError::Panicked("logger")))
            .unwrap_or(Err(SessionError::Panicked("logger")));

        if let Some(req) = self.plot.take() {
            if let Err(e) = req.render() {
                warn!(error = %e, "plot not rendered");
            }
        }

        let control = control?.map_err(SessionError::Loop)?;
        let rows = rows??;
        Ok(SessionReport {
            start_point: self.start_point,
            control,
            rows,
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.control.is_some() || self.logger.is_some() {
            self.state.request_shutdown();
            if let Some(h) = self.control.take() {
                let _ = h.join();
            }
            if let Some(h) = self.logger.take() {
                let _ = h.join();
            }
        }
    }
}
