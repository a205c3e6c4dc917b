//! Joints and the arm they make up.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::bus::protocol::BROADCAST_ID;
use crate::error::ArmError;
use crate::units::{self, MAX_UNIT};

/// One servo of the arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Joint {
    /// Bus id of the servo.
    pub id: u8,
    /// Calibration offset in actuator units, added after conversion.
    #[serde(default)]
    pub offset: i32,
    /// Lowest goal position the servo may be sent (CW angle limit).
    #[serde(default)]
    pub min: u16,
    /// Highest goal position the servo may be sent (CCW angle limit).
    #[serde(default = "default_max")]
    pub max: u16,
}

fn default_max() -> u16 {
    MAX_UNIT
}

impl Joint {
    /// A joint with the full 0..=1023 range.
    pub fn new(id: u8, offset: i32) -> Self {
        Self {
            id,
            offset,
            min: 0,
            max: MAX_UNIT,
        }
    }

    /// Restrict the mechanical range.
    pub fn with_range(mut self, min: u16, max: u16) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Goal position for a normalized angle, clamped to the mechanical range.
    ///
    /// Returns the unclamped value as well so callers can report clamping.
    /// An inverted range (rejected by [`Arm::new`]) clamps to `max`.
    pub fn goal_units(&self, angle_rad: f64) -> (u16, i32) {
        let raw = units::to_actuator_units(angle_rad, self.offset);
        let clamped = raw.max(self.min as i32).min(self.max as i32);
        (clamped.clamp(0, MAX_UNIT as i32) as u16, raw)
    }

    /// Normalized angle for a position read back from the servo.
    pub fn angle_of(&self, position: u16) -> f64 {
        units::to_radians(position as i32, self.offset)
    }
}

/// The ordered, fixed set of joints of an arm.
///
/// Built once at startup; every command batch walks it in index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arm {
    joints: Vec<Joint>,
}

impl Arm {
    /// Validate and wrap a joint list.
    pub fn new(joints: Vec<Joint>) -> Result<Self, ArmError> {
        if joints.is_empty() {
            return Err(ArmError::config("arm has no joints"));
        }

        let mut seen = HashSet::new();
        for joint in &joints {
            if joint.id >= BROADCAST_ID {
                return Err(ArmError::config(format!("joint id {} is reserved", joint.id)));
            }
            if !seen.insert(joint.id) {
                return Err(ArmError::config(format!("duplicate joint id {}", joint.id)));
            }
            if joint.min >= joint.max || joint.max > MAX_UNIT {
                return Err(ArmError::config(format!(
                    "joint {} has invalid range {}..={}",
                    joint.id, joint.min, joint.max
                )));
            }
        }

        Ok(Self { joints })
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn ids(&self) -> Vec<u8> {
        self.joints.iter().map(|j| j.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_units_clamped_to_range() {
        let joint = Joint::new(2, 188);
        let (goal, raw) = joint.goal_units(units::CEILING_ANGLE);
        assert_eq!(raw, 1023 + 188);
        assert_eq!(goal, 1023);

        let joint = Joint::new(1, -62);
        let (goal, raw) = joint.goal_units(units::BASELINE_ANGLE);
        assert_eq!(raw, -62);
        assert_eq!(goal, 0);

        let joint = Joint::new(3, 0).with_range(200, 800);
        assert_eq!(joint.goal_units(units::BASELINE_ANGLE).0, 200);
    }

    #[test]
    fn test_goal_units_with_inverted_range() {
        let joint = Joint::new(1, 0).with_range(900, 100);
        assert_eq!(joint.goal_units(1.0).0, 100);
        assert_eq!(joint.goal_units(units::CEILING_ANGLE).0, 100);
        assert!(Arm::new(vec![joint]).is_err());
    }

    #[test]
    fn test_angle_of_inverts_goal() {
        let joint = Joint::new(0, 188);
        let (goal, _) = joint.goal_units(2.0);
        assert!((joint.angle_of(goal) - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_arm_validation() {
        assert!(Arm::new(vec![]).is_err());
        assert!(Arm::new(vec![Joint::new(1, 0), Joint::new(1, 5)]).is_err());
        assert!(Arm::new(vec![Joint::new(BROADCAST_ID, 0)]).is_err());
        assert!(Arm::new(vec![Joint::new(1, 0).with_range(900, 100)]).is_err());
        assert!(Arm::new(vec![Joint::new(1, 0).with_range(0, 2000)]).is_err());
        assert!(Arm::new(vec![Joint::new(1, 0).with_range(0, 0)]).is_err());

        let arm = Arm::new(vec![Joint::new(4, 0), Joint::new(2, 0)]).unwrap();
        assert_eq!(arm.ids(), vec![4, 2]);
        assert_eq!(arm.len(), 2);
    }
}
