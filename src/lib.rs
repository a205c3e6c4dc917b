//! Joint-angle motion pipeline for serial-bus servo arms.
//!
//! Takes poses (one angle per joint, in radians, centered on zero), turns
//! them into goal positions for Dynamixel protocol 1.0 servos (RX/AX control
//! table), sends them over a shared serial bus and waits for the arm to
//! settle before the next pose.
//!
//! - [`units`]: radians to actuator units and back
//! - [`normalize`]: shift, wrap and clamp raw poses into the servo band
//! - [`bus`]: the [`BusHandler`] trait, protocol 1.0 framing, a serial
//!   implementation (`serial` feature) and a [`SimulatedBus`]
//! - [`arm`]: the [`ArmController`] that owns the bus and drives every joint
//! - [`command`]: the loop that feeds poses to the controller
//!
//! # Quick Start
//!
//! ```ignore
//! use std::io::BufReader;
//! use std::sync::atomic::AtomicBool;
//! use dxl_arm::{ArmConfig, ArmController, PoseReader, SerialBus};
//!
//! let config = ArmConfig::default();
//! let bus = SerialBus::open("/dev/ttyUSB0", config.baud_rate)?;
//! let mut arm = ArmController::new(bus, config)?;
//! arm.initialize()?;
//!
//! let stdin = std::io::stdin();
//! let mut poses = PoseReader::new(BufReader::new(stdin.lock()), arm.arm().len());
//! let summary = dxl_arm::command::run(&mut arm, &mut poses, &AtomicBool::new(true))?;
//! ```

pub mod arm;
pub mod bus;
pub mod command;
pub mod config;
pub mod control_table;
pub mod error;
pub mod joint;
pub mod normalize;
pub mod units;

pub use arm::{ArmController, JointReading, MoveReport, PositionSnapshot};
pub use bus::{BusError, BusHandler, CommFailure, CommResult, DeviceError, SimulatedBus};
#[cfg(feature = "serial")]
pub use bus::{list_ports, SerialBus};
pub use command::{LoopSummary, PoseReader, PoseSource};
pub use config::{ArmConfig, ConvergencePolicy, FailurePolicy};
pub use error::ArmError;
pub use joint::{Arm, Joint};
pub use normalize::{normalize, Normalized, NormalizedPose, RangeCorrection};
