//! Arm controller.
//!
//! Owns the bus and drives every joint through it, one transaction at a time
//! and always in joint order:
//!
//! 1. [`initialize`](ArmController::initialize): set the baud rate, then per
//!    joint enable torque, set the moving speed, write the angle limits and
//!    read the starting position.
//! 2. [`move_to`](ArmController::move_to): write one goal position per joint,
//!    poll the moving flag of every joint until a full pass reports all of
//!    them stopped, then read the positions back.
//!
//! Every bus outcome goes through [`bus::check`]. What happens on failure is
//! decided by the configured [`FailurePolicy`].

use std::fmt;
use std::time::Instant;

use crate::bus::{self, BusHandler, CommResult};
use crate::config::{ArmConfig, FailurePolicy};
use crate::control_table::{
    CCW_ANGLE_LIMIT, CW_ANGLE_LIMIT, GOAL_POSITION, MOVING, MOVING_SPEED, PRESENT_POSITION,
    TORQUE_ENABLE, TORQUE_OFF, TORQUE_ON,
};
use crate::error::ArmError;
use crate::joint::Arm;
use crate::normalize::NormalizedPose;

/// Last observed position of every joint, in actuator units.
///
/// Only the controller writes it. A failed read keeps the previous value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSnapshot {
    positions: Vec<Option<u16>>,
}

impl PositionSnapshot {
    fn new(len: usize) -> Self {
        Self {
            positions: vec![None; len],
        }
    }

    /// Position of the joint at `index`, `None` if it was never read.
    pub fn get(&self, index: usize) -> Option<u16> {
        self.positions.get(index).copied().flatten()
    }

    pub fn positions(&self) -> &[Option<u16>] {
        &self.positions
    }

    fn record(&mut self, index: usize, position: u16) {
        self.positions[index] = Some(position);
    }
}

/// Position of one joint after a move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointReading {
    pub id: u8,
    /// Last known position, `None` if the joint was never read.
    pub position: Option<u16>,
    /// `position` converted back to a normalized angle.
    pub angle: Option<f64>,
    /// False when this read failed and `position` is stale.
    pub fresh: bool,
}

/// What a completed move did.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveReport {
    /// Goal position written to each joint, in joint order.
    pub goals: Vec<u16>,
    /// Status passes needed for the arm to settle.
    pub passes: u32,
    pub readings: Vec<JointReading>,
}

/// Drives an arm over an exclusively owned bus.
pub struct ArmController<B: BusHandler> {
    bus: B,
    arm: Arm,
    config: ArmConfig,
    snapshot: PositionSnapshot,
}

impl<B: BusHandler> ArmController<B> {
    /// Validate `config` and take ownership of `bus`.
    pub fn new(bus: B, config: ArmConfig) -> Result<Self, ArmError> {
        config.validate()?;
        let arm = config.arm()?;
        let snapshot = PositionSnapshot::new(arm.len());
        Ok(Self {
            bus,
            arm,
            config,
            snapshot,
        })
    }

    pub fn arm(&self) -> &Arm {
        &self.arm
    }

    pub fn config(&self) -> &ArmConfig {
        &self.config
    }

    pub fn snapshot(&self) -> &PositionSnapshot {
        &self.snapshot
    }

    /// Read-only access to the bus (e.g. to inspect a simulated bus).
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutable access to the bus, e.g. to reconfigure a simulated bus
    /// between moves. Register traffic should still go through the controller.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Give the bus back, ending the controller.
    pub fn into_bus(self) -> B {
        self.bus
    }

    /// Ids of joints that do not answer a ping.
    pub fn missing_joints(&mut self) -> Vec<u8> {
        let mut missing = Vec::new();
        for joint in self.arm.joints() {
            if bus::check(joint.id, "ping", self.bus.ping(joint.id)).is_err() {
                missing.push(joint.id);
            }
        }
        missing
    }

    /// Configure the bus and every joint.
    ///
    /// Fails without touching any joint if the bus rejects the baud rate.
    /// Per-joint failures are logged and skipped unless the failure policy
    /// is [`FailurePolicy::Abort`].
    pub fn initialize(&mut self) -> Result<(), ArmError> {
        if !self.bus.is_open() && !self.bus.open_port() {
            tracing::error!("Failed to open the port!");
            return Err(ArmError::PortOpen {
                port: "bus".to_string(),
                reason: "port is not open".to_string(),
            });
        }

        let baud_rate = self.config.baud_rate;
        if !self.bus.set_baud_rate(baud_rate) {
            tracing::error!("Failed to change the baudrate to {}", baud_rate);
            return Err(ArmError::BusConfig { baud_rate });
        }
        tracing::info!("Baud rate set to {}", baud_rate);

        let policy = self.config.on_error;
        let speed = self.config.moving_speed;

        for (index, joint) in self.arm.joints().iter().enumerate() {
            let id = joint.id;

            let torque = bus::write_register(&mut self.bus, id, TORQUE_ENABLE, TORQUE_ON);
            if step(policy, id, "enable torque", torque)?.is_some() {
                tracing::info!(id, "Torque enabled");
            }

            let result = bus::write_register(&mut self.bus, id, MOVING_SPEED, speed);
            if step(policy, id, "set moving speed", result)?.is_some() {
                tracing::info!(id, speed, "Moving speed updated");
            }

            let result = bus::write_register(&mut self.bus, id, CW_ANGLE_LIMIT, joint.min);
            step(policy, id, "set minimum position", result)?;

            let result = bus::write_register(&mut self.bus, id, CCW_ANGLE_LIMIT, joint.max);
            if step(policy, id, "set maximum position", result)?.is_some() {
                tracing::info!(id, min = joint.min, max = joint.max, "Range updated");
            }

            let result = bus::read_register(&mut self.bus, id, PRESENT_POSITION);
            if let Some(position) = step(policy, id, "read present position", result)? {
                self.snapshot.record(index, position);
                tracing::info!(id, position, "Present position");
            }
        }

        Ok(())
    }

    /// Send the arm to `pose` and wait for it to settle.
    ///
    /// Exactly one goal position is written per joint, in joint order. A
    /// joint that stays in motion (or cannot be read) past the convergence
    /// bounds ends the wait with [`ArmError::ConvergenceTimeout`].
    pub fn move_to(&mut self, pose: &NormalizedPose) -> Result<MoveReport, ArmError> {
        if pose.len() != self.arm.len() {
            return Err(ArmError::PoseLength {
                expected: self.arm.len(),
                got: pose.len(),
            });
        }

        let goals = self.dispatch(pose)?;
        let passes = self.wait_until_settled()?;
        let readings = self.read_positions()?;

        Ok(MoveReport {
            goals,
            passes,
            readings,
        })
    }

    /// Read every joint's present position into the snapshot.
    pub fn read_positions(&mut self) -> Result<Vec<JointReading>, ArmError> {
        let policy = self.config.on_error;
        let mut readings = Vec::with_capacity(self.arm.len());

        for (index, joint) in self.arm.joints().iter().enumerate() {
            let result = bus::read_register(&mut self.bus, joint.id, PRESENT_POSITION);
            let fresh = match step(policy, joint.id, "read present position", result)? {
                Some(position) => {
                    self.snapshot.record(index, position);
                    true
                }
                None => false,
            };

            let position = self.snapshot.get(index);
            let angle = position.map(|p| joint.angle_of(p));
            if let (Some(position), Some(radians)) = (position, angle) {
                tracing::info!(id = joint.id, position, radians, fresh, "Present position");
            }

            readings.push(JointReading {
                id: joint.id,
                position,
                angle,
                fresh,
            });
        }

        Ok(readings)
    }

    /// Disable torque on every joint.
    pub fn release_torque(&mut self) -> Result<(), ArmError> {
        let policy = self.config.on_error;
        for joint in self.arm.joints() {
            let result = bus::write_register(&mut self.bus, joint.id, TORQUE_ENABLE, TORQUE_OFF);
            if step(policy, joint.id, "disable torque", result)?.is_some() {
                tracing::info!(id = joint.id, "Torque disabled");
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, pose: &NormalizedPose) -> Result<Vec<u16>, ArmError> {
        let policy = self.config.on_error;
        let mut goals = Vec::with_capacity(self.arm.len());

        for (joint, &angle) in self.arm.joints().iter().zip(pose.angles()) {
            let (goal, raw) = joint.goal_units(angle);
            if goal as i32 != raw {
                tracing::warn!(id = joint.id, raw, goal, "Goal outside mechanical range, clamped");
            }

            let result = bus::write_register(&mut self.bus, joint.id, GOAL_POSITION, goal);
            step(policy, joint.id, "write goal position", result)?;
            goals.push(goal);
        }

        Ok(goals)
    }

    /// Poll the moving flag of every joint until one pass reads all zero.
    fn wait_until_settled(&mut self) -> Result<u32, ArmError> {
        let policy = self.config.on_error;
        let limits = self.config.convergence;
        let start = Instant::now();
        let mut passes = 0;

        loop {
            passes += 1;
            let mut moving = Vec::new();

            for joint in self.arm.joints() {
                let result = bus::read_register(&mut self.bus, joint.id, MOVING);
                match step(policy, joint.id, "read moving status", result)? {
                    Some(0) => {}
                    Some(status) => {
                        tracing::debug!(id = joint.id, status, "Moving");
                        moving.push(joint.id);
                    }
                    // Unreadable is not stopped.
                    None => moving.push(joint.id),
                }
            }

            if moving.is_empty() {
                tracing::debug!(passes, "Arm settled");
                return Ok(passes);
            }

            let elapsed = start.elapsed();
            if passes >= limits.max_passes || elapsed >= limits.timeout() {
                tracing::error!(passes, ?elapsed, ?moving, "Arm did not settle");
                return Err(ArmError::ConvergenceTimeout {
                    passes,
                    elapsed,
                    moving,
                });
            }

            let interval = limits.poll_interval();
            if !interval.is_zero() {
                std::thread::sleep(interval);
            }
        }
    }
}

/// Check one joint step and apply the failure policy to it.
///
/// `Ok(None)` means the step failed and was skipped.
fn step<T: fmt::Debug>(
    policy: FailurePolicy,
    id: u8,
    operation: &'static str,
    result: CommResult<T>,
) -> Result<Option<T>, ArmError> {
    match bus::check(id, operation, result) {
        Ok(value) => Ok(Some(value)),
        Err(source) => match policy {
            FailurePolicy::Continue => Ok(None),
            FailurePolicy::Abort => Err(ArmError::JointStep {
                id,
                operation,
                source,
            }),
        },
    }
}
