//! Session runtime for the tank positioning rig.
//!
//! Ties the noise filter and PID regulator to the sensor/actuator collaborators
//! and shares the latest run data between the control, visualization and
//! logging contexts through [`RunState`].

pub mod clock;
pub mod config;
pub mod control_loop;
pub mod datalog;
pub mod device;
pub mod error;
pub mod plot;
pub mod session;
pub mod state;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::RunConfig;
pub use control_loop::{ControlLoop, LoopConfig, LoopPhase, LoopReport, TickSample};
pub use datalog::{run_logger, DataLog, LogMetadata, LogRecord};
pub use device::{Actuator, PositionSensor};
pub use error::{ConfigError, DataLogError, DeviceError, LoopError, PlotError, SessionError};
pub use plot::PlotRequest;
pub use session::{Session, SessionReport};
pub use state::{RunSnapshot, RunState, ShutdownSignal, TravelRange};
