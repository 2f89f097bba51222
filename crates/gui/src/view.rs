use controller::PidConfig;
use runtime::TravelRange;

/// The setline turns green when the vessel is this close to the setpoint.
pub const ON_TARGET_TOLERANCE: f64 = 5.0;

/// Horizontal position in the tank drawing, 0 at the start point, 1 at the far wall.
pub fn tank_fraction(value: f64, travel: TravelRange) -> f64 {
    let width = travel.max - travel.min;
    if width <= 0.0 {
        return 0.0;
    }
    ((travel.max - value) / width).clamp(0.0, 1.0)
}

pub fn on_target(setpoint: f64, sensor: f64) -> bool {
    (setpoint - sensor).abs() < ON_TARGET_TOLERANCE
}

/// Share of full thrust for a servo command. The upper bound means no thrust.
pub fn thrust_fraction(servo: f64, pid: &PidConfig) -> f64 {
    let span = pid.out_max - pid.out_min;
    if span <= 0.0 {
        return 0.0;
    }
    ((pid.out_max - servo) / span).clamp(0.0, 1.0)
}
