//! Simulated servo bus.
//!
//! Drop-in replacement for [`SerialBus`](super::SerialBus) that doesn't need
//! hardware. Each simulated servo keeps its own control table; a goal-position
//! write starts a move that finishes after a fixed number of moving-status
//! polls. Faults can be injected per servo and register, and every
//! transaction is recorded so tests can check exactly what went over the bus.

use std::collections::{BTreeMap, HashMap};

use super::{BusError, BusHandler, CommFailure, CommResult, DeviceError};
use crate::control_table::{self, TABLE_LEN};
use crate::units::MAX_UNIT;

/// Moving-status polls a simulated move takes by default.
pub const DEFAULT_SETTLE_POLLS: u32 = 3;

/// One recorded bus transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusCall {
    SetBaudRate(u32),
    Ping { id: u8 },
    Write { id: u8, address: u8, value: u16 },
    Read { id: u8, address: u8 },
}

#[derive(Clone, Debug)]
struct SimServo {
    table: [u8; TABLE_LEN],
    polls_left: u32,
    stuck: bool,
}

impl SimServo {
    fn new(position: u16) -> Self {
        let mut servo = Self {
            table: [0; TABLE_LEN],
            polls_left: 0,
            stuck: false,
        };
        servo.set(control_table::CW_ANGLE_LIMIT.address, 0);
        servo.set(control_table::CCW_ANGLE_LIMIT.address, MAX_UNIT);
        servo.set(control_table::PRESENT_POSITION.address, position);
        servo.set(control_table::GOAL_POSITION.address, position);
        servo
    }

    fn get(&self, address: u8) -> u16 {
        let a = address as usize;
        u16::from_le_bytes([self.table[a], self.table[a + 1]])
    }

    fn set(&mut self, address: u8, value: u16) {
        let a = address as usize;
        self.table[a..a + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn moving(&self) -> bool {
        self.table[control_table::MOVING.address as usize] != 0
    }

    fn set_moving(&mut self, moving: bool) {
        self.table[control_table::MOVING.address as usize] = moving as u8;
    }

    /// Advance the simulated move by one status poll.
    fn step(&mut self) {
        if !self.moving() || self.stuck {
            return;
        }
        self.polls_left = self.polls_left.saturating_sub(1);
        if self.polls_left == 0 {
            let goal = self.get(control_table::GOAL_POSITION.address);
            self.set(control_table::PRESENT_POSITION.address, goal);
            self.set_moving(false);
        }
    }
}

/// An in-memory chain of protocol 1.0 servos.
#[derive(Clone, Debug)]
pub struct SimulatedBus {
    open: bool,
    baud_rate: Option<u32>,
    reject_baud: bool,
    settle_polls: u32,
    servos: BTreeMap<u8, SimServo>,
    faults: HashMap<(u8, u8), BusError>,
    log_calls: bool,
    calls: Vec<BusCall>,
    transactions: u64,
}

impl SimulatedBus {
    /// Create an open bus with one servo per id, all resting at `position`.
    pub fn new(ids: impl IntoIterator<Item = u8>, position: u16) -> Self {
        Self {
            open: true,
            baud_rate: None,
            reject_baud: false,
            settle_polls: DEFAULT_SETTLE_POLLS,
            servos: ids.into_iter().map(|id| (id, SimServo::new(position))).collect(),
            faults: HashMap::new(),
            log_calls: true,
            calls: Vec::new(),
            transactions: 0,
        }
    }

    /// Number of moving-status polls a move takes (at least 1).
    pub fn with_settle_polls(mut self, polls: u32) -> Self {
        self.settle_polls = polls.max(1);
        self
    }

    /// Count transactions without keeping them, for long-running sessions.
    pub fn without_call_log(mut self) -> Self {
        self.log_calls = false;
        self
    }

    /// Make every baud-rate change fail.
    pub fn rejecting_baud_rate(mut self) -> Self {
        self.reject_baud = true;
        self
    }

    /// Make every access to `address` on servo `id` fail with `error`.
    pub fn inject_fault(&mut self, id: u8, address: u8, error: BusError) {
        self.faults.insert((id, address), error);
    }

    /// Keep servo `id` reporting "moving" forever once it starts a move.
    pub fn set_stuck(&mut self, id: u8, stuck: bool) {
        if let Some(servo) = self.servos.get_mut(&id) {
            servo.stuck = stuck;
        }
    }

    /// Remove a servo from the chain (it stops answering).
    pub fn disconnect(&mut self, id: u8) {
        self.servos.remove(&id);
    }

    /// Close the simulated port.
    pub fn close(&mut self) {
        self.open = false;
    }

    /// Last accepted baud rate.
    pub fn baud_rate(&self) -> Option<u32> {
        self.baud_rate
    }

    /// Every transaction issued so far, in order (empty when the call log
    /// is off).
    pub fn calls(&self) -> &[BusCall] {
        &self.calls
    }

    /// Number of transactions issued so far, logged or not.
    pub fn transactions(&self) -> u64 {
        self.transactions
    }

    /// Register writes issued so far, as `(id, address, value)`.
    pub fn writes(&self) -> Vec<(u8, u8, u16)> {
        self.calls
            .iter()
            .filter_map(|call| match *call {
                BusCall::Write { id, address, value } => Some((id, address, value)),
                _ => None,
            })
            .collect()
    }

    /// Writes to one register, as `(id, value)`.
    pub fn writes_to(&self, address: u8) -> Vec<(u8, u16)> {
        self.writes()
            .into_iter()
            .filter(|&(_, a, _)| a == address)
            .map(|(id, _, value)| (id, value))
            .collect()
    }

    /// Number of reads of one register.
    pub fn reads_of(&self, address: u8) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, BusCall::Read { address: a, .. } if *a == address))
            .count()
    }

    /// Peek at a 2-byte register without going over the bus.
    pub fn register(&self, id: u8, address: u8) -> Option<u16> {
        self.servos.get(&id).map(|s| s.get(address))
    }

    /// Peek at a 1-byte register without going over the bus.
    pub fn register_byte(&self, id: u8, address: u8) -> Option<u8> {
        self.servos.get(&id).map(|s| s.table[address as usize])
    }

    fn record(&mut self, call: BusCall) {
        self.transactions += 1;
        if self.log_calls {
            self.calls.push(call);
        }
    }

    fn servo(&mut self, id: u8, address: u8, width: u8) -> CommResult<&mut SimServo> {
        if !self.open {
            return Err(CommFailure::PortClosed.into());
        }
        if let Some(error) = self.faults.get(&(id, address)) {
            return Err(*error);
        }
        let servo = self.servos.get_mut(&id).ok_or(CommFailure::RxTimeout)?;
        if address as usize + width as usize > TABLE_LEN {
            return Err(DeviceError::from_bits(DeviceError::INSTRUCTION).into());
        }
        Ok(servo)
    }

    fn write(&mut self, id: u8, address: u8, width: u8, value: u16) -> CommResult<()> {
        self.record(BusCall::Write { id, address, value });
        let settle_polls = self.settle_polls;
        let servo = self.servo(id, address, width)?;

        if address == control_table::GOAL_POSITION.address {
            let min = servo.get(control_table::CW_ANGLE_LIMIT.address);
            let max = servo.get(control_table::CCW_ANGLE_LIMIT.address);
            if value < min || value > max {
                return Err(DeviceError::from_bits(DeviceError::ANGLE_LIMIT).into());
            }
            servo.set(address, value);
            let present = servo.get(control_table::PRESENT_POSITION.address);
            if present != value || servo.stuck {
                servo.polls_left = settle_polls;
                servo.set_moving(true);
            }
            return Ok(());
        }

        if width == 1 {
            servo.table[address as usize] = value as u8;
        } else {
            if value > MAX_UNIT {
                return Err(DeviceError::from_bits(DeviceError::RANGE).into());
            }
            servo.set(address, value);
        }
        Ok(())
    }

    fn read(&mut self, id: u8, address: u8, width: u8) -> CommResult<u16> {
        self.record(BusCall::Read { id, address });
        let servo = self.servo(id, address, width)?;

        if address == control_table::MOVING.address {
            let moving = servo.moving();
            servo.step();
            return Ok(moving as u16);
        }

        Ok(if width == 1 {
            servo.table[address as usize] as u16
        } else {
            servo.get(address)
        })
    }
}

impl BusHandler for SimulatedBus {
    fn open_port(&mut self) -> bool {
        self.open = true;
        true
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> bool {
        self.record(BusCall::SetBaudRate(baud_rate));
        if !self.open || self.reject_baud {
            return false;
        }
        self.baud_rate = Some(baud_rate);
        true
    }

    fn ping(&mut self, id: u8) -> CommResult<()> {
        self.record(BusCall::Ping { id });
        if !self.open {
            return Err(CommFailure::PortClosed.into());
        }
        if self.servos.contains_key(&id) {
            Ok(())
        } else {
            Err(CommFailure::RxTimeout.into())
        }
    }

    fn write_1byte(&mut self, id: u8, address: u8, value: u8) -> CommResult<()> {
        self.write(id, address, 1, value as u16)
    }

    fn write_2byte(&mut self, id: u8, address: u8, value: u16) -> CommResult<()> {
        self.write(id, address, 2, value)
    }

    fn read_1byte(&mut self, id: u8, address: u8) -> CommResult<u8> {
        self.read(id, address, 1).map(|v| v as u8)
    }

    fn read_2byte(&mut self, id: u8, address: u8) -> CommResult<u16> {
        self.read(id, address, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_table::{GOAL_POSITION, MOVING, PRESENT_POSITION, TORQUE_ENABLE};

    #[test]
    fn test_move_settles_after_polls() {
        let mut bus = SimulatedBus::new([1], 100).with_settle_polls(2);
        bus.write_2byte(1, GOAL_POSITION.address, 600).unwrap();

        assert_eq!(bus.read_1byte(1, MOVING.address), Ok(1));
        assert_eq!(bus.read_1byte(1, MOVING.address), Ok(1));
        assert_eq!(bus.read_1byte(1, MOVING.address), Ok(0));
        assert_eq!(bus.read_2byte(1, PRESENT_POSITION.address), Ok(600));
    }

    #[test]
    fn test_goal_equal_to_present_does_not_move() {
        let mut bus = SimulatedBus::new([1], 300);
        bus.write_2byte(1, GOAL_POSITION.address, 300).unwrap();
        assert_eq!(bus.read_1byte(1, MOVING.address), Ok(0));
    }

    #[test]
    fn test_stuck_servo_never_settles() {
        let mut bus = SimulatedBus::new([1], 100).with_settle_polls(1);
        bus.set_stuck(1, true);
        bus.write_2byte(1, GOAL_POSITION.address, 200).unwrap();
        for _ in 0..20 {
            assert_eq!(bus.read_1byte(1, MOVING.address), Ok(1));
        }
    }

    #[test]
    fn test_goal_outside_limits_is_device_error() {
        let mut bus = SimulatedBus::new([1], 100);
        bus.write_2byte(1, control_table::CCW_ANGLE_LIMIT.address, 800).unwrap();
        let err = bus.write_2byte(1, GOAL_POSITION.address, 900).unwrap_err();
        assert_eq!(
            err,
            BusError::Device(DeviceError::from_bits(DeviceError::ANGLE_LIMIT))
        );
        assert_eq!(bus.register(1, GOAL_POSITION.address), Some(100));
    }

    #[test]
    fn test_missing_servo_times_out() {
        let mut bus = SimulatedBus::new([1], 0);
        assert_eq!(
            bus.write_1byte(2, TORQUE_ENABLE.address, 1),
            Err(BusError::Comm(CommFailure::RxTimeout))
        );
        assert_eq!(bus.ping(2), Err(BusError::Comm(CommFailure::RxTimeout)));
        assert!(bus.ping(1).is_ok());
    }

    #[test]
    fn test_injected_fault_and_call_log() {
        let mut bus = SimulatedBus::new([1, 2], 0);
        bus.inject_fault(2, TORQUE_ENABLE.address, CommFailure::RxCorrupt.into());

        assert!(bus.write_1byte(1, TORQUE_ENABLE.address, 1).is_ok());
        assert!(bus.write_1byte(2, TORQUE_ENABLE.address, 1).is_err());
        assert_eq!(bus.register_byte(1, TORQUE_ENABLE.address), Some(1));
        assert_eq!(bus.register_byte(2, TORQUE_ENABLE.address), Some(0));
        assert_eq!(bus.writes_to(TORQUE_ENABLE.address), vec![(1, 1), (2, 1)]);
    }

    #[test]
    fn test_closed_port_and_baud_rejection() {
        let mut bus = SimulatedBus::new([1], 0).rejecting_baud_rate();
        assert!(!bus.set_baud_rate(57600));
        assert_eq!(bus.baud_rate(), None);

        let mut bus = SimulatedBus::new([1], 0);
        bus.close();
        assert!(!bus.is_open());
        assert_eq!(
            bus.read_2byte(1, PRESENT_POSITION.address),
            Err(BusError::Comm(CommFailure::PortClosed))
        );
        assert!(bus.open_port());
        assert!(bus.set_baud_rate(57600));
        assert_eq!(bus.baud_rate(), Some(57600));
    }

    #[test]
    fn test_call_log_can_be_disabled() {
        let mut bus = SimulatedBus::new([1], 0).without_call_log();
        for _ in 0..100 {
            bus.write_2byte(1, GOAL_POSITION.address, 300).unwrap();
            bus.read_1byte(1, MOVING.address).unwrap();
        }
        assert!(bus.calls().is_empty());
        assert_eq!(bus.transactions(), 200);
        assert_eq!(bus.register(1, GOAL_POSITION.address), Some(300));
    }
}
