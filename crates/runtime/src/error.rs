use std::path::PathBuf;
use std::process::ExitStatus;

use crate::control_loop::LoopPhase;

/// Failure reported by a sensor or actuator binding.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device disconnected: {0}")]
    Disconnected(String),

    #[error("sensor read failed: {0}")]
    Read(String),

    #[error("actuator write failed: {0}")]
    Write(String),

    #[error("command {value} outside device range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
}

/// Conditions that end a control loop run.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("sensor failure: {0}")]
    Sensor(#[source] DeviceError),

    #[error("actuator failure: {0}")]
    Actuator(#[source] DeviceError),

    #[error("control loop is {actual:?}, expected {expected:?}")]
    InvalidPhase {
        actual: LoopPhase,
        expected: LoopPhase,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DataLogError {
    #[error("data log I/O: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PlotError {
    #[error("failed to start plot program `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send plot script: {0}")]
    Io(#[from] std::io::Error),

    #[error("plot program exited with {0}")]
    Failed(ExitStatus),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("calibration failed: {0}")]
    Calibrate(#[source] LoopError),

    #[error("control loop failed: {0}")]
    Loop(#[source] LoopError),

    #[error(transparent)]
    DataLog(#[from] DataLogError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("{0} thread panicked")]
    Panicked(&'static str),
}
