//! Simulated tank rig standing in for the interface kit and servo hardware.
//!
//! The vessel sits in a current that pushes it toward higher sensor readings.
//! The thruster pushes back, with strength proportional to how far the servo
//! command is below its "no thrust" end.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use runtime::device::SENSOR_MAX;
use runtime::{Actuator, Clock, DeviceError, PositionSensor};

/// Integration substep for the plant.
pub const MAX_SUBSTEP: Duration = Duration::from_millis(5);

#[derive(Clone, Copy, Debug)]
pub struct VesselParams {
    /// Acceleration at full thrust, sensor units / s^2.
    pub thrust_accel: f64,
    /// Constant acceleration from the tank current.
    pub current_accel: f64,
    /// Linear drag coefficient, 1/s.
    pub drag: f64,
    pub min_servo: f64,
    pub max_servo: f64,
    /// Physical travel limits in sensor units.
    pub travel: (f64, f64),
}

impl Default for VesselParams {
    fn default() -> Self {
        Self {
            thrust_accel: 60.0,
            current_accel: 20.0,
            drag: 3.0,
            min_servo: 101.0,
            max_servo: 107.0,
            travel: (0.0, f64::from(SENSOR_MAX)),
        }
    }
}

impl VesselParams {
    /// Fraction of full thrust for a servo command, in `[0, 1]`.
    pub fn thrust(&self, servo: f64) -> f64 {
        let span = self.max_servo - self.min_servo;
        if span <= 0.0 {
            return 0.0;
        }
        ((self.max_servo - servo) / span).clamp(0.0, 1.0)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct VesselState {
    pub position: f64,
    pub velocity: f64,
}

impl VesselState {
    pub fn at(position: f64) -> Self {
        Self {
            position,
            velocity: 0.0,
        }
    }

    /// Euler step of `a = current - thrust * thrust_accel - drag * v`.
    pub fn step(&mut self, p: &VesselParams, servo: f64, dt_s: f64) {
        let accel = p.current_accel - p.thrust_accel * p.thrust(servo) - p.drag * self.velocity;
        self.velocity += accel * dt_s;
        self.position += self.velocity * dt_s;

        let (lo, hi) = p.travel;
        if self.position < lo || self.position > hi {
            self.position = self.position.clamp(lo, hi);
            self.velocity = 0.0;
        }
        if !self.position.is_finite() {
            *self = Self::at(hi);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SensorFault {
    None,
    Stuck { value: u16 },
    Bias { value: f64 },
    /// Fail every read after the first `reads` successful ones.
    DropoutAfter { reads: u64 },
    /// The device stays attached but the analog input returns no value.
    NoValue,
}

/// Gaussian noise, quantization and clamping on top of the true position.
#[derive(Clone, Debug)]
pub struct NoisySensor {
    pub fault: SensorFault,
    noise: Option<Normal<f64>>,
    rng: StdRng,
    reads: u64,
}

impl NoisySensor {
    /// A negative or non-finite `noise_std` disables the noise.
    pub fn new(noise_std: f64, seed: u64) -> Self {
        let noise = if noise_std > 0.0 {
            Normal::new(0.0, noise_std).ok()
        } else {
            None
        };
        Self {
            fault: SensorFault::None,
            noise,
            rng: StdRng::seed_from_u64(seed),
            reads: 0,
        }
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn read(&mut self, true_position: f64) -> Result<u16, DeviceError> {
        let mut v = match self.fault {
            SensorFault::None => true_position,
            SensorFault::Stuck { value } => return self.count(value.min(SENSOR_MAX)),
            SensorFault::Bias { value } => true_position + value,
            SensorFault::DropoutAfter { reads } => {
                if self.reads >= reads {
                    return Err(DeviceError::Disconnected(format!(
                        "position sensor dropped out after {reads} reads"
                    )));
                }
                true_position
            }
            SensorFault::NoValue => {
                return Err(DeviceError::Read("analog input returned no value".into()))
            }
        };

        if let Some(noise) = &self.noise {
            v += noise.sample(&mut self.rng);
        }

        let quantized = v.round().clamp(0.0, f64::from(SENSOR_MAX)) as u16;
        self.count(quantized)
    }

    fn count(&mut self, value: u16) -> Result<u16, DeviceError> {
        self.reads += 1;
        Ok(value)
    }
}

struct Plant {
    params: VesselParams,
    vessel: VesselState,
    sensor: NoisySensor,
    servo: f64,
    servo_released: bool,
    clock: Arc<dyn Clock>,
    last: Instant,
}

impl Plant {
    fn advance(&mut self) {
        let now = self.clock.now();
        let mut remaining = now.saturating_duration_since(self.last);
        while !remaining.is_zero() {
            let dt = remaining.min(MAX_SUBSTEP);
            self.vessel.step(&self.params, self.servo, dt.as_secs_f64());
            remaining -= dt;
        }
        self.last = self.last.max(now);
    }
}

/// Handle on the shared simulated rig. Clones observe the same plant.
#[derive(Clone)]
pub struct TankRig {
    plant: Arc<Mutex<Plant>>,
}

impl TankRig {
    /// Split a fresh rig into the two device bindings the control loop needs.
    pub fn new(
        params: VesselParams,
        start: f64,
        sensor: NoisySensor,
        clock: Arc<dyn Clock>,
    ) -> (RigSensor, RigActuator) {
        let rig = Self::shared(params, start, sensor, clock);
        (rig.sensor(), rig.actuator())
    }

    /// Build a rig kept around for inspection alongside its bindings.
    pub fn shared(
        params: VesselParams,
        start: f64,
        sensor: NoisySensor,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let last = clock.now();
        let (lo, hi) = params.travel;
        let plant = Plant {
            vessel: VesselState::at(start.clamp(lo, hi)),
            servo: params.max_servo,
            servo_released: false,
            params,
            sensor,
            clock,
            last,
        };
        Self {
            plant: Arc::new(Mutex::new(plant)),
        }
    }

    pub fn sensor(&self) -> RigSensor {
        RigSensor {
            plant: self.plant.clone(),
        }
    }

    pub fn actuator(&self) -> RigActuator {
        RigActuator {
            plant: self.plant.clone(),
        }
    }

    /// True vessel position after advancing to the current clock time.
    pub fn position(&self) -> f64 {
        let mut plant = self.plant.lock();
        plant.advance();
        plant.vessel.position
    }

    pub fn servo(&self) -> f64 {
        self.plant.lock().servo
    }

    pub fn servo_released(&self) -> bool {
        self.plant.lock().servo_released
    }

    pub fn set_fault(&self, fault: SensorFault) {
        self.plant.lock().sensor.fault = fault;
    }
}

pub struct RigSensor {
    plant: Arc<Mutex<Plant>>,
}

impl PositionSensor for RigSensor {
    fn read_raw_position(&mut self) -> Result<u16, DeviceError> {
        let mut plant = self.plant.lock();
        plant.advance();
        let position = plant.vessel.position;
        plant.sensor.read(position)
    }
}

pub struct RigActuator {
    plant: Arc<Mutex<Plant>>,
}

impl Actuator for RigActuator {
    fn set_position(&mut self, command: f64) -> Result<(), DeviceError> {
        let mut plant = self.plant.lock();
        let (min, max) = (plant.params.min_servo, plant.params.max_servo);
        if !(min..=max).contains(&command) {
            return Err(DeviceError::OutOfRange {
                value: command,
                min,
                max,
            });
        }
        if plant.servo_released {
            return Err(DeviceError::Disconnected("servo released".into()));
        }
        // the old command acted up to now
        plant.advance();
        plant.servo = command;
        Ok(())
    }

    fn release(&mut self) {
        self.plant.lock().servo_released = true;
    }
}
