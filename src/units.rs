//! Conversions between joint angles and actuator position units.
//!
//! The RX/AX servos encode position as an integer in `0..=1023` spread over
//! 300 degrees (5pi/3). The normalizer shifts every target into the band
//! `[pi/6, 11pi/6]`, which is exactly 5pi/3 wide, so the bottom of that band
//! ([`BASELINE_ANGLE`]) maps to unit 0 and the top maps to [`MAX_UNIT`].
//! Each joint then adds its own calibration offset to compensate for
//! assembly variance.

use std::f64::consts::PI;

/// Highest position value the actuator accepts.
pub const MAX_UNIT: u16 = 1023;

/// Angle (in the normalized frame) that corresponds to actuator unit 0.
pub const BASELINE_ANGLE: f64 = PI / 6.0;

/// Upper bound of the normalized band, corresponds to [`MAX_UNIT`].
pub const CEILING_ANGLE: f64 = 11.0 * PI / 6.0;

/// Actuator units per radian: `(3 * MAX_UNIT) / (5 * pi)`.
pub const UNITS_PER_RADIAN: f64 = (3.0 * MAX_UNIT as f64) / (5.0 * PI);

/// Convert a normalized angle to actuator units for a joint with the given
/// calibration offset.
///
/// Rounds half away from zero. The result is not clamped; callers that write
/// it to a servo must clamp it to the joint's mechanical range.
#[inline]
pub fn to_actuator_units(angle_rad: f64, calibration_offset: i32) -> i32 {
    ((angle_rad - BASELINE_ANGLE) * UNITS_PER_RADIAN).round() as i32 + calibration_offset
}

/// Convert actuator units read back from a joint into a normalized angle.
///
/// Exact inverse of [`to_actuator_units`] before rounding.
#[inline]
pub fn to_radians(units: i32, calibration_offset: i32) -> f64 {
    (units - calibration_offset) as f64 / UNITS_PER_RADIAN + BASELINE_ANGLE
}
