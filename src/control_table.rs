//! RX/AX-series control table (protocol 1.0).
//!
//! Only the registers the arm controller touches are listed.

/// A register in the servo control table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Register {
    /// Byte offset in the control table.
    pub address: u8,
    /// Register width in bytes (1 or 2).
    pub width: u8,
    /// Name used in log output.
    pub name: &'static str,
}

impl Register {
    const fn new(address: u8, width: u8, name: &'static str) -> Self {
        Self {
            address,
            width,
            name,
        }
    }
}

/// Clockwise angle limit (minimum goal position).
pub const CW_ANGLE_LIMIT: Register = Register::new(6, 2, "cw_angle_limit");
/// Counter-clockwise angle limit (maximum goal position).
pub const CCW_ANGLE_LIMIT: Register = Register::new(8, 2, "ccw_angle_limit");
pub const TORQUE_ENABLE: Register = Register::new(24, 1, "torque_enable");
pub const GOAL_POSITION: Register = Register::new(30, 2, "goal_position");
/// Speed used to travel to the goal position.
pub const MOVING_SPEED: Register = Register::new(32, 2, "moving_speed");
pub const PRESENT_POSITION: Register = Register::new(36, 2, "present_position");
/// 1 while the servo is travelling towards its goal position.
pub const MOVING: Register = Register::new(46, 1, "moving");

/// Size of the RAM + EEPROM area covered by the registers above.
pub const TABLE_LEN: usize = 50;

pub const TORQUE_ON: u16 = 1;
pub const TORQUE_OFF: u16 = 0;
