//! Serial-port bus handler.
//!
//! [`SerialBus`] talks protocol 1.0 over a local serial adapter (USB2Dynamixel,
//! U2D2 or similar) using the [`serialport`](https://crates.io/crates/serialport)
//! crate. The port is opened when the bus is created and closed when it is
//! dropped.
//!
//! # Example
//!
//! ```no_run
//! use dxl_arm::bus::{BusHandler, SerialBus};
//!
//! # fn example() -> Result<(), dxl_arm::ArmError> {
//! let mut bus = SerialBus::open("/dev/ttyUSB0", 57600)?;
//! let position = bus.read_2byte(1, 36);
//! # Ok(())
//! # }
//! ```

use std::io::Write;
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};

use super::protocol::{self, BROADCAST_ID};
use super::{BusError, BusHandler, CommFailure, CommResult};
use crate::error::ArmError;

/// How long to wait for a status packet.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);

/// A protocol 1.0 bus over a local serial port.
pub struct SerialBus {
    path: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialBus {
    /// Open a serial port with the default status timeout.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, ArmError> {
        Self::open_with_timeout(path, baud_rate, DEFAULT_TIMEOUT)
    }

    /// Open a serial port with an explicit status timeout.
    pub fn open_with_timeout(
        path: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Self, ArmError> {
        let mut bus = Self {
            path: path.to_string(),
            baud_rate,
            timeout,
            port: None,
        };
        bus.connect().map_err(|e| ArmError::PortOpen {
            port: path.to_string(),
            reason: e.to_string(),
        })?;
        tracing::info!("Opened {} @ {} baud", bus.path, bus.baud_rate);
        Ok(bus)
    }

    /// Port name this bus was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current line speed.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn connect(&mut self) -> serialport::Result<()> {
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(self.timeout)
            .open()?;
        self.port = Some(port);
        Ok(())
    }

    /// Send one instruction packet and collect the status parameters.
    fn transact(&mut self, id: u8, packet: &[u8]) -> CommResult<Vec<u8>> {
        let port = self.port.as_mut().ok_or(CommFailure::PortClosed)?;

        // Drop stale bytes from an earlier, abandoned exchange.
        if let Err(e) = port.clear(ClearBuffer::Input) {
            tracing::debug!("Serial clear error: {}", e);
        }

        port.write_all(packet).map_err(|e| {
            tracing::debug!("Serial write error: {}", e);
            CommFailure::TxFail
        })?;
        port.flush().map_err(|_| CommFailure::TxFail)?;

        if id == BROADCAST_ID {
            return Ok(Vec::new());
        }

        let status = protocol::read_status(port, id)?;
        if !status.error.is_empty() {
            return Err(BusError::Device(status.error));
        }
        Ok(status.params)
    }

    fn read(&mut self, id: u8, address: u8, len: u8) -> CommResult<Vec<u8>> {
        let packet = protocol::read_packet(id, address, len)?;
        let params = self.transact(id, &packet)?;
        if params.len() != len as usize {
            return Err(CommFailure::RxCorrupt.into());
        }
        Ok(params)
    }

    fn write(&mut self, id: u8, address: u8, data: &[u8]) -> CommResult<()> {
        let packet = protocol::write_packet(id, address, data)?;
        self.transact(id, &packet).map(|_| ())
    }
}

impl BusHandler for SerialBus {
    fn open_port(&mut self) -> bool {
        if self.port.is_some() {
            return true;
        }
        match self.connect() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to open {}: {}", self.path, e);
                false
            }
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> bool {
        let Some(port) = self.port.as_mut() else {
            return false;
        };
        match port.set_baud_rate(baud_rate) {
            Ok(()) => {
                self.baud_rate = baud_rate;
                true
            }
            Err(e) => {
                tracing::error!("{} rejected {} baud: {}", self.path, baud_rate, e);
                false
            }
        }
    }

    fn ping(&mut self, id: u8) -> CommResult<()> {
        let packet = protocol::ping_packet(id)?;
        self.transact(id, &packet).map(|_| ())
    }

    fn write_1byte(&mut self, id: u8, address: u8, value: u8) -> CommResult<()> {
        self.write(id, address, &[value])
    }

    fn write_2byte(&mut self, id: u8, address: u8, value: u16) -> CommResult<()> {
        self.write(id, address, &value.to_le_bytes())
    }

    fn read_1byte(&mut self, id: u8, address: u8) -> CommResult<u8> {
        let data = self.read(id, address, 1)?;
        Ok(data[0])
    }

    fn read_2byte(&mut self, id: u8, address: u8) -> CommResult<u16> {
        let data = self.read(id, address, 2)?;
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }
}

impl Drop for SerialBus {
    fn drop(&mut self) {
        if self.port.take().is_some() {
            tracing::info!("Closed {}", self.path);
        }
    }
}

/// List available serial ports on the system.
pub fn list_ports() -> Result<Vec<SerialPortInfo>, ArmError> {
    let ports = serialport::available_ports().map_err(|e| ArmError::PortOpen {
        port: "*".to_string(),
        reason: e.to_string(),
    })?;
    Ok(ports
        .into_iter()
        .map(|p| SerialPortInfo {
            name: p.port_name,
            port_type: match p.port_type {
                serialport::SerialPortType::UsbPort(info) => PortType::Usb {
                    vid: info.vid,
                    pid: info.pid,
                    product: info.product,
                },
                serialport::SerialPortType::PciPort => PortType::Pci,
                serialport::SerialPortType::BluetoothPort => PortType::Bluetooth,
                serialport::SerialPortType::Unknown => PortType::Unknown,
            },
        })
        .collect())
}

/// Information about a detected serial port.
#[derive(Clone, Debug)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" on Linux, "COM3" on Windows)
    pub name: String,
    pub port_type: PortType,
}

/// Type of serial port hardware.
#[derive(Clone, Debug)]
pub enum PortType {
    Usb {
        vid: u16,
        pid: u16,
        product: Option<String>,
    },
    Pci,
    Bluetooth,
    Unknown,
}
