//! Dynamixel protocol 1.0 packet framing.
//!
//! Instruction packet: `[0xFF, 0xFF, id, length, instruction, params.., checksum]`
//! Status packet:      `[0xFF, 0xFF, id, length, error, params.., checksum]`
//!
//! `length` counts the parameters plus two (instruction/error and checksum).
//! The checksum is the inverted low byte of the sum of every byte after the
//! header, checksum excluded.

use std::io::{self, Read};

use super::{CommFailure, DeviceError};

pub const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Id that addresses every servo at once. Servos never answer it.
pub const BROADCAST_ID: u8 = 0xFE;

/// Largest length byte a packet may carry.
pub const MAX_LENGTH: usize = 0xFF;

/// Size of a status packet without parameters.
pub const STATUS_MIN_LEN: usize = 6;

/// Protocol 1.0 instructions used by the arm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
}

/// A decoded status packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusPacket {
    pub id: u8,
    pub error: DeviceError,
    pub params: Vec<u8>,
}

/// Checksum over `id`, `length` and the body bytes.
pub fn checksum(bytes: &[u8]) -> u8 {
    let mut sum: u8 = 0;
    for &b in bytes {
        sum = sum.wrapping_add(b);
    }
    !sum
}

/// Build an instruction packet.
pub fn instruction_packet(
    id: u8,
    instruction: Instruction,
    params: &[u8],
) -> Result<Vec<u8>, CommFailure> {
    let length = params.len() + 2;
    if length > MAX_LENGTH {
        return Err(CommFailure::TxError);
    }

    let mut pkt = Vec::with_capacity(6 + params.len());
    pkt.extend_from_slice(&HEADER);
    pkt.push(id);
    pkt.push(length as u8);
    pkt.push(instruction as u8);
    pkt.extend_from_slice(params);
    pkt.push(checksum(&pkt[2..]));
    Ok(pkt)
}

pub fn ping_packet(id: u8) -> Result<Vec<u8>, CommFailure> {
    instruction_packet(id, Instruction::Ping, &[])
}

pub fn read_packet(id: u8, address: u8, len: u8) -> Result<Vec<u8>, CommFailure> {
    instruction_packet(id, Instruction::Read, &[address, len])
}

pub fn write_packet(id: u8, address: u8, data: &[u8]) -> Result<Vec<u8>, CommFailure> {
    let mut params = Vec::with_capacity(data.len() + 1);
    params.push(address);
    params.extend_from_slice(data);
    instruction_packet(id, Instruction::Write, &params)
}

/// Decode a complete status packet and check it answers `expected_id`.
///
/// The error byte is returned as-is; turning a non-empty error into a
/// failure is left to the caller.
pub fn parse_status(packet: &[u8], expected_id: u8) -> Result<StatusPacket, CommFailure> {
    if packet.len() < STATUS_MIN_LEN || packet[..2] != HEADER {
        return Err(CommFailure::RxCorrupt);
    }

    let id = packet[2];
    let length = packet[3] as usize;
    if length < 2 || packet.len() != length + 4 {
        return Err(CommFailure::RxCorrupt);
    }

    let (body, chk) = packet[2..].split_at(packet.len() - 3);
    if checksum(body) != chk[0] {
        return Err(CommFailure::RxCorrupt);
    }
    if id != expected_id {
        return Err(CommFailure::RxCorrupt);
    }

    Ok(StatusPacket {
        id,
        error: DeviceError::from_bits(packet[4]),
        params: packet[5..packet.len() - 1].to_vec(),
    })
}

/// Read one status packet from `reader` and decode it.
///
/// Bytes before the header are skipped (line noise after a baud change),
/// up to one packet's worth.
pub fn read_status<R: Read>(reader: &mut R, expected_id: u8) -> Result<StatusPacket, CommFailure> {
    let mut window = [0u8; 2];
    reader.read_exact(&mut window[1..]).map_err(rx_failure)?;
    let mut skipped = 0;
    loop {
        window[0] = window[1];
        reader.read_exact(&mut window[1..]).map_err(rx_failure)?;
        if window == HEADER {
            break;
        }
        skipped += 1;
        if skipped > MAX_LENGTH {
            return Err(CommFailure::RxCorrupt);
        }
    }

    let mut id_len = [0u8; 2];
    reader.read_exact(&mut id_len).map_err(rx_failure)?;
    let length = id_len[1] as usize;
    if length < 2 {
        return Err(CommFailure::RxCorrupt);
    }

    let mut packet = Vec::with_capacity(length + 4);
    packet.extend_from_slice(&HEADER);
    packet.extend_from_slice(&id_len);
    packet.resize(length + 4, 0);
    reader.read_exact(&mut packet[4..]).map_err(rx_failure)?;

    parse_status(&packet, expected_id)
}

fn rx_failure(e: io::Error) -> CommFailure {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::UnexpectedEof => {
            CommFailure::RxTimeout
        }
        _ => CommFailure::RxFail,
    }
}

/// Build a status packet, the way a servo would answer.
pub fn status_packet(id: u8, error: u8, params: &[u8]) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(6 + params.len());
    pkt.extend_from_slice(&HEADER);
    pkt.push(id);
    pkt.push((params.len() + 2) as u8);
    pkt.push(error);
    pkt.extend_from_slice(params);
    pkt.push(checksum(&pkt[2..]));
    pkt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        // Ping id 1: id + len + inst = 1 + 2 + 1 = 4 -> !4 = 0xFB
        assert_eq!(checksum(&[0x01, 0x02, 0x01]), 0xFB);
        // Sum overflows a byte.
        assert_eq!(checksum(&[0xFE, 0x04, 0x03, 0x18, 0x01]), !0x1Eu8);
    }

    #[test]
    fn test_write_goal_position_packet() {
        // Goal position 512 (0x0200) on id 1, address 30.
        let pkt = write_packet(1, 30, &512u16.to_le_bytes()).unwrap();
        assert_eq!(pkt, vec![0xFF, 0xFF, 0x01, 0x05, 0x03, 0x1E, 0x00, 0x02, 0xD6]);
    }

    #[test]
    fn test_read_packet() {
        let pkt = read_packet(1, 36, 2).unwrap();
        assert_eq!(pkt, vec![0xFF, 0xFF, 0x01, 0x04, 0x02, 0x24, 0x02, 0xD2]);
    }

    #[test]
    fn test_ping_packet() {
        assert_eq!(ping_packet(1).unwrap(), vec![0xFF, 0xFF, 0x01, 0x02, 0x01, 0xFB]);
    }

    #[test]
    fn test_oversized_packet_rejected() {
        let data = vec![0u8; 300];
        assert_eq!(write_packet(1, 30, &data), Err(CommFailure::TxError));
    }

    #[test]
    fn test_parse_status() {
        let pkt = status_packet(3, 0, &[0x20, 0x01]);
        let status = parse_status(&pkt, 3).unwrap();
        assert_eq!(status.id, 3);
        assert!(status.error.is_empty());
        assert_eq!(status.params, vec![0x20, 0x01]);
    }

    #[test]
    fn test_parse_status_with_error_flags() {
        let pkt = status_packet(2, DeviceError::ANGLE_LIMIT, &[]);
        let status = parse_status(&pkt, 2).unwrap();
        assert!(status.error.contains(DeviceError::ANGLE_LIMIT));
        assert!(status.params.is_empty());
    }

    #[test]
    fn test_parse_status_rejects_bad_packets() {
        let good = status_packet(4, 0, &[0x10]);

        let mut bad_checksum = good.clone();
        *bad_checksum.last_mut().unwrap() ^= 0x01;
        assert_eq!(parse_status(&bad_checksum, 4), Err(CommFailure::RxCorrupt));

        let mut bad_header = good.clone();
        bad_header[0] = 0x00;
        assert_eq!(parse_status(&bad_header, 4), Err(CommFailure::RxCorrupt));

        assert_eq!(parse_status(&good, 5), Err(CommFailure::RxCorrupt));
        assert_eq!(parse_status(&good[..5], 4), Err(CommFailure::RxCorrupt));
    }

    #[test]
    fn test_read_status_skips_noise() {
        let mut stream = vec![0x00, 0x7F];
        stream.extend(status_packet(6, 0, &[0xFF, 0x03]));
        let status = read_status(&mut io::Cursor::new(stream), 6).unwrap();
        assert_eq!(status.params, vec![0xFF, 0x03]);
    }

    #[test]
    fn test_read_status_timeout_on_short_stream() {
        let pkt = status_packet(6, 0, &[0x01, 0x02]);
        let mut cursor = io::Cursor::new(pkt[..5].to_vec());
        assert_eq!(read_status(&mut cursor, 6), Err(CommFailure::RxTimeout));
        assert_eq!(
            read_status(&mut io::Cursor::new(Vec::new()), 6),
            Err(CommFailure::RxTimeout)
        );
    }
}
