//! Contracts for the hardware collaborators driven by the control loop.

use crate::error::DeviceError;

/// Highest raw value a position sensor reports.
pub const SENSOR_MAX: u16 = 1000;

pub trait PositionSensor: Send {
    /// Latest raw reading in `0..=SENSOR_MAX`.
    fn read_raw_position(&mut self) -> Result<u16, DeviceError>;

    /// Close the underlying device. Called once when the loop stops.
    fn release(&mut self) {}
}

pub trait Actuator: Send {
    /// Command a new position in device units. Fire-and-forget.
    fn set_position(&mut self, command: f64) -> Result<(), DeviceError>;

    fn release(&mut self) {}
}
