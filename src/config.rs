//! Static arm configuration.
//!
//! Everything here is fixed for the lifetime of a controller: the joint table
//! (ids, calibration offsets, mechanical ranges), the line speed, the moving
//! speed sent to every servo, and the policies for failures and convergence.
//!
//! The defaults describe the stock 7-joint arm. A JSON file can override
//! any subset of fields:
//!
//! ```json
//! {
//!   "baud_rate": 57600,
//!   "joints": [
//!     { "id": 1, "offset": -62 },
//!     { "id": 2, "offset": 188, "min": 100, "max": 900 }
//!   ],
//!   "convergence": { "max_passes": 500, "timeout_ms": 5000 },
//!   "on_error": "abort"
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ArmError;
use crate::joint::{Arm, Joint};
use crate::units::MAX_UNIT;

/// Baud rate of the stock arm.
pub const DEFAULT_BAUD_RATE: u32 = 9615;

/// Moving speed register value sent to every joint.
pub const DEFAULT_MOVING_SPEED: u16 = 97;

/// Bus ids of the stock arm.
pub const DEFAULT_IDS: [u8; 7] = [0, 1, 2, 3, 4, 5, 6];

/// Calibration offsets of the stock arm, by joint index.
pub const DEFAULT_OFFSETS: [i32; 7] = [0, -62, 188, 0, 0, 0, 0];

/// What to do when a single joint step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and carry on with the next step.
    #[default]
    Continue,
    /// Stop and return the failure to the caller.
    Abort,
}

/// Bounds on the wait for the arm to stop moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergencePolicy {
    /// Maximum number of full status passes over all joints.
    pub max_passes: u32,
    /// Wall-clock limit for the whole wait, in milliseconds.
    pub timeout_ms: u64,
    /// Pause between passes, in milliseconds. Zero polls back to back.
    pub poll_interval_ms: u64,
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self {
            max_passes: 10_000,
            timeout_ms: 30_000,
            poll_interval_ms: 0,
        }
    }
}

impl ConvergencePolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Set the maximum number of passes.
    pub fn max_passes(mut self, passes: u32) -> Self {
        self.max_passes = passes;
        self
    }

    /// Set the wall-clock limit.
    pub fn timeout_after(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }
}

/// Full arm configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmConfig {
    pub baud_rate: u32,
    pub moving_speed: u16,
    pub joints: Vec<Joint>,
    pub convergence: ConvergencePolicy,
    pub on_error: FailurePolicy,
    /// Disable torque on every joint when the program exits.
    pub release_torque_on_exit: bool,
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            moving_speed: DEFAULT_MOVING_SPEED,
            joints: DEFAULT_IDS
                .iter()
                .zip(DEFAULT_OFFSETS)
                .map(|(&id, offset)| Joint::new(id, offset))
                .collect(),
            convergence: ConvergencePolicy::default(),
            on_error: FailurePolicy::default(),
            release_torque_on_exit: false,
        }
    }
}

impl ArmConfig {
    /// Parse a JSON configuration; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ArmError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ArmError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn save(&self, path: &Path) -> Result<(), ArmError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check the configuration without building anything.
    pub fn validate(&self) -> Result<(), ArmError> {
        self.arm()?;
        if self.baud_rate == 0 {
            return Err(ArmError::config("baud rate must be positive"));
        }
        if self.moving_speed > MAX_UNIT {
            return Err(ArmError::config(format!(
                "moving speed {} exceeds {}",
                self.moving_speed, MAX_UNIT
            )));
        }
        if self.convergence.max_passes == 0 {
            return Err(ArmError::config("convergence.max_passes must be positive"));
        }
        Ok(())
    }

    /// Build the immutable joint table.
    pub fn arm(&self) -> Result<Arm, ArmError> {
        Arm::new(self.joints.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ArmConfig::default();
        assert_eq!(config.baud_rate, 9615);
        assert_eq!(config.moving_speed, 97);
        assert_eq!(config.joints.len(), 7);
        assert_eq!(config.joints[1].offset, -62);
        assert_eq!(config.joints[2].offset, 188);
        assert_eq!(config.joints[6].id, 6);
        assert_eq!(config.on_error, FailurePolicy::Continue);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ArmConfig::from_json(
            r#"{
                "baud_rate": 57600,
                "joints": [{ "id": 1, "offset": -62 }, { "id": 2, "min": 100, "max": 900 }],
                "convergence": { "max_passes": 50 },
                "on_error": "abort"
            }"#,
        )
        .unwrap();

        assert_eq!(config.baud_rate, 57600);
        assert_eq!(config.moving_speed, DEFAULT_MOVING_SPEED);
        assert_eq!(config.joints[0], Joint::new(1, -62));
        assert_eq!(config.joints[1], Joint::new(2, 0).with_range(100, 900));
        assert_eq!(config.convergence.max_passes, 50);
        assert_eq!(config.convergence.timeout_ms, 30_000);
        assert_eq!(config.on_error, FailurePolicy::Abort);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            ArmConfig::from_json(r#"{ "joints": [] }"#),
            Err(ArmError::Config(_))
        ));
        assert!(matches!(
            ArmConfig::from_json(r#"{ "moving_speed": 4000 }"#),
            Err(ArmError::Config(_))
        ));
        assert!(matches!(
            ArmConfig::from_json(r#"{ "on_error": "explode" }"#),
            Err(ArmError::Json(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("dxl-arm-config-{}.json", std::process::id()));
        let mut config = ArmConfig::default();
        config.release_torque_on_exit = true;
        config.save(&path).unwrap();

        let loaded = ArmConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }
}
