//! Angle normalization.
//!
//! Raw targets are centered on zero. Servos accept the band `[pi/6, 11pi/6]`,
//! so each target is shifted by pi, wrapped once if it passed a full turn,
//! and clamped into the band. Clamping is reported but never fatal.

use std::f64::consts::{PI, TAU};

use crate::error::ArmError;
use crate::joint::Arm;
use crate::units::{BASELINE_ANGLE, CEILING_ANGLE};

/// Which edge of the band a target was clamped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Lower,
    Upper,
}

/// One out-of-range target that was clamped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeCorrection {
    /// Joint index in the arm.
    pub index: usize,
    /// Bus id of the joint.
    pub id: u8,
    /// Shifted angle before clamping.
    pub requested: f64,
    pub bound: Bound,
}

/// Joint targets inside `[pi/6, 11pi/6]`, one per joint, in joint order.
///
/// Only [`normalize`] builds one.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPose(Vec<f64>);

impl NormalizedPose {
    pub fn angles(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of normalizing one pose.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub pose: NormalizedPose,
    pub corrections: Vec<RangeCorrection>,
}

/// Shift, wrap and clamp a single angle.
pub fn normalize_angle(raw: f64) -> (f64, Option<Bound>) {
    let angle = shift(raw);
    if angle < BASELINE_ANGLE {
        (BASELINE_ANGLE, Some(Bound::Lower))
    } else if angle > CEILING_ANGLE {
        (CEILING_ANGLE, Some(Bound::Upper))
    } else {
        (angle, None)
    }
}

/// Normalize a raw pose for `arm`.
///
/// Emits one warning per clamped joint. Fails if the pose length does not
/// match the arm or an angle is NaN.
pub fn normalize(arm: &Arm, raw: &[f64]) -> Result<Normalized, ArmError> {
    if raw.len() != arm.len() {
        return Err(ArmError::PoseLength {
            expected: arm.len(),
            got: raw.len(),
        });
    }

    let mut angles = Vec::with_capacity(raw.len());
    let mut corrections = Vec::new();

    for (index, (joint, &target)) in arm.joints().iter().zip(raw).enumerate() {
        if target.is_nan() {
            return Err(ArmError::input(format!("joint {} target is NaN", joint.id)));
        }

        let (angle, bound) = normalize_angle(target);
        if let Some(bound) = bound {
            let requested = shift(target);
            tracing::warn!(
                id = joint.id,
                requested,
                clamped = angle,
                "joint {} target out of range, clamped",
                joint.id
            );
            corrections.push(RangeCorrection {
                index,
                id: joint.id,
                requested,
                bound,
            });
        }
        angles.push(angle);
    }

    Ok(Normalized {
        pose: NormalizedPose(angles),
        corrections,
    })
}

/// Move a zero-centered angle into `[0, 2pi]` (single wrap).
fn shift(raw: f64) -> f64 {
    let angle = raw + PI;
    if angle > TAU {
        angle - TAU
    } else {
        angle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joint::Joint;

    fn arm(n: u8) -> Arm {
        Arm::new((0..n).map(|id| Joint::new(id, 0)).collect()).unwrap()
    }

    #[test]
    fn test_zero_maps_to_pi() {
        let out = normalize(&arm(7), &[0.0; 7]).unwrap();
        assert!(out.corrections.is_empty());
        for &a in out.pose.angles() {
            assert!((a - PI).abs() < 1e-12);
        }
    }

    #[test]
    fn test_minus_pi_clamped_to_lower_bound() {
        let mut raw = [0.0; 7];
        raw[3] = -PI;
        let out = normalize(&arm(7), &raw).unwrap();

        assert_eq!(out.pose.angles()[3], BASELINE_ANGLE);
        assert_eq!(out.corrections.len(), 1);
        assert_eq!(out.corrections[0].id, 3);
        assert_eq!(out.corrections[0].index, 3);
        assert_eq!(out.corrections[0].bound, Bound::Lower);
        assert!(out.corrections[0].requested.abs() < 1e-12);
    }

    #[test]
    fn test_wrap_past_full_turn() {
        // 1.5pi + pi = 2.5pi -> wraps to 0.5pi, inside the band.
        let (angle, bound) = normalize_angle(1.5 * PI);
        assert!((angle - 0.5 * PI).abs() < 1e-12);
        assert_eq!(bound, None);
    }

    #[test]
    fn test_upper_clamp() {
        // 0.9pi + pi = 1.9pi > 11pi/6 and below 2pi, no wrap.
        let (angle, bound) = normalize_angle(0.9 * PI);
        assert_eq!(angle, CEILING_ANGLE);
        assert_eq!(bound, Some(Bound::Upper));
    }

    #[test]
    fn test_in_range_values_unchanged() {
        for raw in [-2.5, -1.0, 0.0, 0.3, 2.5] {
            let (angle, bound) = normalize_angle(raw);
            assert_eq!(bound, None);
            assert!((angle - (raw + PI)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_output_always_in_band() {
        let mut raw = -20.0;
        while raw < 20.0 {
            let (angle, _) = normalize_angle(raw);
            assert!((BASELINE_ANGLE..=CEILING_ANGLE).contains(&angle), "{raw} -> {angle}");
            raw += 0.05;
        }
        assert_eq!(normalize_angle(f64::INFINITY).0, CEILING_ANGLE);
        assert_eq!(normalize_angle(f64::NEG_INFINITY).0, BASELINE_ANGLE);
    }

    #[test]
    fn test_one_correction_per_out_of_range_joint() {
        let raw = [-PI, 0.0, 0.95 * PI, -3.0, 0.0];
        let out = normalize(&arm(5), &raw).unwrap();
        let ids: Vec<u8> = out.corrections.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 2, 3]);
        assert_eq!(out.pose.len(), 5);
    }

    #[test]
    fn test_length_mismatch_and_nan() {
        assert!(matches!(
            normalize(&arm(3), &[0.0; 2]),
            Err(ArmError::PoseLength { expected: 3, got: 2 })
        ));
        assert!(matches!(
            normalize(&arm(2), &[0.0, f64::NAN]),
            Err(ArmError::Input(_))
        ));
    }
}
