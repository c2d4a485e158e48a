//! GDB Remote Serial Protocol packet framing.
//!
//! ```text
//! $<packet-data>#<checksum>
//! ```
//!
//! The checksum is the modulo-256 sum of the transmitted packet-data bytes,
//! as two hex digits. Inside packet-data, `}` escapes the next byte (XOR
//! `0x20`) and `X*n` repeats `X` another `n - 29` times.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Start of a packet.
pub const PACKET_START: u8 = b'$';
/// End of packet-data, followed by two checksum digits.
pub const PACKET_END: u8 = b'#';
/// Positive acknowledgement.
pub const ACK: u8 = b'+';
/// Negative acknowledgement; requests retransmission.
pub const NACK: u8 = b'-';

const ESCAPE: u8 = b'}';
const RUN_LENGTH: u8 = b'*';
const RUN_LENGTH_BIAS: u8 = 29;

/// Packet decoding error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("escape at end of packet")]
    TrailingEscape,
    #[error("run-length marker without a preceding byte")]
    RunWithoutByte,
    #[error("run-length marker without a count")]
    MissingRunCount,
    #[error("invalid run-length count {0:#04x}")]
    InvalidRunCount(u8),
    #[error("invalid checksum digits {0:?}")]
    InvalidChecksum(String),
}

/// Modulo-256 sum of `data`.
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Frame `payload` as a complete packet, escaping special bytes.
#[must_use]
pub fn encode(payload: &[u8]) -> BytesMut {
    let mut frame = BytesMut::with_capacity(payload.len() + 4);
    frame.put_u8(PACKET_START);
    for &b in payload {
        if matches!(b, PACKET_START | PACKET_END | ESCAPE | RUN_LENGTH) {
            frame.put_u8(ESCAPE);
            frame.put_u8(b ^ 0x20);
        } else {
            frame.put_u8(b);
        }
    }
    let sum = checksum(&frame[1..]);
    frame.put_u8(PACKET_END);
    frame.extend_from_slice(format!("{sum:02x}").as_bytes());
    frame
}

/// Parse the two checksum digits following `#`.
///
/// # Errors
/// Returns error if the digits are not hex.
pub fn parse_checksum(digits: [u8; 2]) -> Result<u8, PacketError> {
    std::str::from_utf8(&digits)
        .ok()
        .and_then(|s| u8::from_str_radix(s, 16).ok())
        .ok_or_else(|| PacketError::InvalidChecksum(String::from_utf8_lossy(&digits).into_owned()))
}

/// Expand escapes and run-length encoding in received packet-data.
///
/// # Errors
/// Returns error on a dangling escape or a malformed run.
pub fn decode(data: &[u8]) -> Result<Vec<u8>, PacketError> {
    let mut out = Vec::with_capacity(data.len());
    let mut bytes = data.iter().copied();

    while let Some(b) = bytes.next() {
        match b {
            ESCAPE => out.push(bytes.next().ok_or(PacketError::TrailingEscape)? ^ 0x20),
            RUN_LENGTH => {
                let &last = out.last().ok_or(PacketError::RunWithoutByte)?;
                let count = bytes.next().ok_or(PacketError::MissingRunCount)?;
                let repeat = count
                    .checked_sub(RUN_LENGTH_BIAS)
                    .ok_or(PacketError::InvalidRunCount(count))?;
                out.extend(std::iter::repeat_n(last, usize::from(repeat)));
            }
            _ => out.push(b),
        }
    }

    Ok(out)
}
