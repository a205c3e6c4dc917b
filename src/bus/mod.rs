//! Serial-bus handler trait and the outcome of a bus transaction.
//!
//! All servos of the arm share one half-duplex line. A [`BusHandler`] hides
//! the transport (a real serial port, or the in-memory [`SimulatedBus`]) and
//! exposes register-level reads and writes addressed by servo id.
//!
//! Every register operation returns a [`CommResult`]: `Ok` when the servo
//! answered with a clean status packet, [`BusError::Comm`] when the exchange
//! itself failed (nothing trustworthy came back), and [`BusError::Device`]
//! when the servo answered but raised one or more error flags.

use std::fmt;

use thiserror::Error;

use crate::control_table::Register;

pub mod protocol;
#[cfg(feature = "serial")]
pub mod serial;
pub mod sim;

#[cfg(feature = "serial")]
pub use serial::{list_ports, SerialBus};
pub use sim::{BusCall, SimulatedBus};

/// Outcome of a single bus transaction.
pub type CommResult<T> = std::result::Result<T, BusError>;

/// Trait for serial-bus implementations.
///
/// Implementations are blocking: each call writes one instruction packet and
/// waits for the matching status packet before returning. Callers must not
/// interleave transactions, the line is half-duplex.
pub trait BusHandler {
    /// Open (or reopen) the underlying port. Returns `false` on failure.
    fn open_port(&mut self) -> bool;

    /// Check if the port is open.
    fn is_open(&self) -> bool;

    /// Change the line speed. Returns `false` if the port rejects the rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> bool;

    /// Ping a servo.
    fn ping(&mut self, id: u8) -> CommResult<()>;

    /// Write a 1-byte register.
    fn write_1byte(&mut self, id: u8, address: u8, value: u8) -> CommResult<()>;

    /// Write a 2-byte (little-endian) register.
    fn write_2byte(&mut self, id: u8, address: u8, value: u16) -> CommResult<()>;

    /// Read a 1-byte register.
    fn read_1byte(&mut self, id: u8, address: u8) -> CommResult<u8>;

    /// Read a 2-byte (little-endian) register.
    fn read_2byte(&mut self, id: u8, address: u8) -> CommResult<u16>;
}

impl<B: BusHandler + ?Sized> BusHandler for Box<B> {
    fn open_port(&mut self) -> bool {
        (**self).open_port()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> bool {
        (**self).set_baud_rate(baud_rate)
    }

    fn ping(&mut self, id: u8) -> CommResult<()> {
        (**self).ping(id)
    }

    fn write_1byte(&mut self, id: u8, address: u8, value: u8) -> CommResult<()> {
        (**self).write_1byte(id, address, value)
    }

    fn write_2byte(&mut self, id: u8, address: u8, value: u16) -> CommResult<()> {
        (**self).write_2byte(id, address, value)
    }

    fn read_1byte(&mut self, id: u8, address: u8) -> CommResult<u8> {
        (**self).read_1byte(id, address)
    }

    fn read_2byte(&mut self, id: u8, address: u8) -> CommResult<u16> {
        (**self).read_2byte(id, address)
    }
}

/// Failure of a bus transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum BusError {
    /// The exchange failed; any returned data must be ignored.
    #[error("communication failure: {0}")]
    Comm(CommFailure),

    /// The servo answered but reported an internal fault.
    #[error("device error: {0}")]
    Device(DeviceError),
}

impl From<CommFailure> for BusError {
    fn from(failure: CommFailure) -> Self {
        Self::Comm(failure)
    }
}

impl From<DeviceError> for BusError {
    fn from(error: DeviceError) -> Self {
        Self::Device(error)
    }
}

/// Why a bus exchange did not complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum CommFailure {
    /// The port is not open.
    #[error("port is not open")]
    PortClosed,

    /// The instruction packet could not be written.
    #[error("failed to transmit instruction packet")]
    TxFail,

    /// The instruction packet was malformed (too many parameters).
    #[error("incorrect instruction packet")]
    TxError,

    /// Reading the status packet failed.
    #[error("failed to receive status packet")]
    RxFail,

    /// No status packet arrived in time.
    #[error("no status packet (timeout)")]
    RxTimeout,

    /// A status packet arrived but its header, id, length or checksum was wrong.
    #[error("corrupted status packet")]
    RxCorrupt,
}

/// Error flags reported in the status packet of a protocol 1.0 servo.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceError(u8);

impl DeviceError {
    pub const INPUT_VOLTAGE: u8 = 0x01;
    pub const ANGLE_LIMIT: u8 = 0x02;
    pub const OVERHEATING: u8 = 0x04;
    pub const RANGE: u8 = 0x08;
    pub const CHECKSUM: u8 = 0x10;
    pub const OVERLOAD: u8 = 0x20;
    pub const INSTRUCTION: u8 = 0x40;

    const NAMES: [(u8, &'static str); 7] = [
        (Self::INPUT_VOLTAGE, "input voltage"),
        (Self::ANGLE_LIMIT, "angle limit"),
        (Self::OVERHEATING, "overheating"),
        (Self::RANGE, "out of range"),
        (Self::CHECKSUM, "checksum"),
        (Self::OVERLOAD, "overload"),
        (Self::INSTRUCTION, "instruction"),
    ];

    /// Wrap a raw status error byte.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// The raw error byte.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// True when no flag is set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    /// Names of the flags that are set, lowest bit first.
    pub fn flag_names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.flag_names();
        if names.is_empty() {
            write!(f, "0x{:02X}", self.0)
        } else {
            write!(f, "0x{:02X} ({})", self.0, names.join(", "))
        }
    }
}

impl fmt::Debug for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceError({self})")
    }
}

impl std::error::Error for DeviceError {}

/// Log the outcome of one bus operation on one servo and hand it back.
///
/// This is the only place bus outcomes are reported; callers decide whether
/// to escalate an `Err` or carry on.
pub fn check<T: fmt::Debug>(id: u8, operation: &str, result: CommResult<T>) -> CommResult<T> {
    match &result {
        Ok(value) => tracing::debug!(id, operation, ?value, "ok"),
        Err(BusError::Comm(failure)) => {
            tracing::warn!(id, operation, "communication failure: {}", failure)
        }
        Err(BusError::Device(error)) => {
            tracing::warn!(id, operation, "device error: {}", error)
        }
    }
    result
}

/// Write a control-table register using the width it declares.
///
/// A value that does not fit a 1-byte register is rejected without touching
/// the bus.
pub fn write_register<B: BusHandler + ?Sized>(
    bus: &mut B,
    id: u8,
    register: Register,
    value: u16,
) -> CommResult<()> {
    tracing::trace!(id, register = register.name, value, "write");
    if register.width == 1 {
        let byte = u8::try_from(value).map_err(|_| CommFailure::TxError)?;
        bus.write_1byte(id, register.address, byte)
    } else {
        bus.write_2byte(id, register.address, value)
    }
}

/// Read a control-table register using the width it declares.
pub fn read_register<B: BusHandler + ?Sized>(
    bus: &mut B,
    id: u8,
    register: Register,
) -> CommResult<u16> {
    tracing::trace!(id, register = register.name, "read");
    if register.width == 1 {
        bus.read_1byte(id, register.address).map(u16::from)
    } else {
        bus.read_2byte(id, register.address)
    }
}
