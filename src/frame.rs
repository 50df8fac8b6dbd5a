//! Wire-level framing: control bytes, integrity functions, packet assembly
//! and validation.
//!
//! Wire format of a data packet:
//!
//! ```text
//! header:u8 | index:u8 | index^0xFF:u8 | payload:128|1024 | integrity:1|2
//! ```
//!
//! `SOH` headers carry 128 payload bytes, `STX` headers carry 1024. The
//! integrity trailer is a one-byte modular checksum in plain mode and a
//! big-endian CRC-16 in CRC and streaming modes.

use bytes::{BufMut, Bytes, BytesMut};

// =============================================================================
// Control bytes
// =============================================================================

/// Start of header: 128-byte packet follows.
pub const SOH: u8 = 0x01;
/// Start of text: 1024-byte packet follows.
pub const STX: u8 = 0x02;
/// End of transmission.
pub const EOT: u8 = 0x04;
/// Positive acknowledgment.
pub const ACK: u8 = 0x06;
/// Negative acknowledgment; also the plain-mode handshake byte.
pub const NAK: u8 = 0x15;
/// Cancel. Two in a row abort the transfer.
pub const CAN: u8 = 0x18;
/// Padding byte for short final packets.
pub const SUB: u8 = 0x1A;
/// CRC-mode handshake byte.
pub const CRC_HANDSHAKE: u8 = b'C';
/// Streaming-mode handshake byte.
pub const STREAM_HANDSHAKE: u8 = b'G';

// =============================================================================
// Work mode
// =============================================================================

/// The integrity/handshake dialect negotiated for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkMode {
    /// Plain XMODEM: one-byte checksum, handshake `NAK`.
    Checksum,
    /// CRC-16 framing, handshake `C`.
    Crc,
    /// CRC-16 framing without per-packet acknowledgments, handshake `G`.
    Stream,
}

impl WorkMode {
    /// The byte a receiver sends to advertise this mode.
    pub fn handshake_byte(self) -> u8 {
        match self {
            WorkMode::Checksum => NAK,
            WorkMode::Crc => CRC_HANDSHAKE,
            WorkMode::Stream => STREAM_HANDSHAKE,
        }
    }

    pub fn uses_crc(self) -> bool {
        !matches!(self, WorkMode::Checksum)
    }

    /// Length of the integrity trailer in this mode.
    pub fn trailer_len(self) -> usize {
        if self.uses_crc() {
            2
        } else {
            1
        }
    }
}

// =============================================================================
// Integrity
// =============================================================================

/// 8-bit modular checksum: sum of all bytes, truncated.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// CRC-16/XMODEM: polynomial 0x1021, initial value 0, no reflection, no
/// final XOR. Transmitted high byte first.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in data {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

// =============================================================================
// Packet assembly / validation
// =============================================================================

/// Payload size announced by a header byte, if it is a packet header at all.
pub fn payload_len_for(header: u8) -> Option<usize> {
    match header {
        SOH => Some(128),
        STX => Some(1024),
        _ => None,
    }
}

/// Bytes remaining on the wire after the header: index, complement, payload,
/// integrity trailer.
pub fn body_len(payload_len: usize, mode: WorkMode) -> usize {
    2 + payload_len + mode.trailer_len()
}

/// Assemble a full packet. The header is chosen from the payload length,
/// which must be exactly 128 or 1024.
pub fn encode_packet(index: u8, payload: &[u8], mode: WorkMode) -> Bytes {
    debug_assert!(payload.len() == 128 || payload.len() == 1024);
    let header = if payload.len() == 1024 { STX } else { SOH };
    let mut buf = BytesMut::with_capacity(3 + payload.len() + mode.trailer_len());
    buf.put_u8(header);
    buf.put_u8(index);
    buf.put_u8(index ^ 0xFF);
    buf.put_slice(payload);
    if mode.uses_crc() {
        buf.put_u16(crc16(payload));
    } else {
        buf.put_u8(checksum(payload));
    }
    buf.freeze()
}

/// Validation outcome for a packet body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketCheck {
    Valid,
    /// Index/complement pair broken, or not the expected index.
    BadIndex,
    /// Integrity trailer does not match the payload.
    BadIntegrity,
}

/// Validate a packet body (everything after the header byte) of
/// `body_len(payload_len, mode)` bytes against the expected block index.
pub fn check_packet_body(
    body: &[u8],
    expected_index: u8,
    payload_len: usize,
    mode: WorkMode,
) -> PacketCheck {
    debug_assert_eq!(body.len(), body_len(payload_len, mode));
    if body[0] ^ body[1] != 0xFF || body[0] != expected_index {
        return PacketCheck::BadIndex;
    }
    let payload = &body[2..2 + payload_len];
    let trailer = &body[2 + payload_len..];
    let ok = if mode.uses_crc() {
        let crc = crc16(payload);
        trailer[0] == (crc >> 8) as u8 && trailer[1] == (crc & 0xFF) as u8
    } else {
        trailer[0] == checksum(payload)
    };
    if ok {
        PacketCheck::Valid
    } else {
        PacketCheck::BadIntegrity
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_reference_vector() {
        assert_eq!(checksum(b"123456789"), 0xDD);
        assert_eq!(checksum(&[0u8; 128]), 0x00);
    }

    #[test]
    fn crc16_reference_vectors() {
        assert_eq!(crc16(b"123456789"), 0x31C3);
        assert_eq!(crc16(&[0u8; 128]), 0x0000);
    }

    #[test]
    fn encode_picks_header_from_payload_len() {
        let small = encode_packet(1, &[0u8; 128], WorkMode::Checksum);
        assert_eq!(small[0], SOH);
        assert_eq!(small.len(), 3 + 128 + 1);

        let big = encode_packet(1, &[0u8; 1024], WorkMode::Crc);
        assert_eq!(big[0], STX);
        assert_eq!(big.len(), 3 + 1024 + 2);
    }

    #[test]
    fn encode_index_and_complement() {
        let packet = encode_packet(0xAB, &[7u8; 128], WorkMode::Crc);
        assert_eq!(packet[1], 0xAB);
        assert_eq!(packet[2], 0xAB ^ 0xFF);
        assert_eq!(packet[1] ^ packet[2], 0xFF);
    }

    #[test]
    fn encode_trailer_matches_mode() {
        let payload = [42u8; 128];

        let plain = encode_packet(1, &payload, WorkMode::Checksum);
        assert_eq!(plain[131], checksum(&payload));

        let crc = crc16(&payload);
        for mode in [WorkMode::Crc, WorkMode::Stream] {
            let framed = encode_packet(1, &payload, mode);
            assert_eq!(framed[131], (crc >> 8) as u8);
            assert_eq!(framed[132], (crc & 0xFF) as u8);
        }
    }

    #[test]
    fn check_accepts_own_encoding() {
        for mode in [WorkMode::Checksum, WorkMode::Crc, WorkMode::Stream] {
            let packet = encode_packet(3, &[9u8; 128], mode);
            assert_eq!(
                check_packet_body(&packet[1..], 3, 128, mode),
                PacketCheck::Valid
            );
        }
    }

    #[test]
    fn check_rejects_wrong_index() {
        let packet = encode_packet(3, &[9u8; 128], WorkMode::Crc);
        assert_eq!(
            check_packet_body(&packet[1..], 4, 128, WorkMode::Crc),
            PacketCheck::BadIndex
        );
    }

    #[test]
    fn check_rejects_broken_complement() {
        let mut packet = encode_packet(3, &[9u8; 128], WorkMode::Crc).to_vec();
        packet[2] ^= 0x01;
        assert_eq!(
            check_packet_body(&packet[1..], 3, 128, WorkMode::Crc),
            PacketCheck::BadIndex
        );
    }

    #[test]
    fn check_rejects_corrupt_payload() {
        for mode in [WorkMode::Checksum, WorkMode::Crc] {
            let mut packet = encode_packet(3, &[9u8; 128], mode).to_vec();
            packet[10] ^= 0xFF;
            assert_eq!(
                check_packet_body(&packet[1..], 3, 128, mode),
                PacketCheck::BadIntegrity
            );
        }
    }
}
