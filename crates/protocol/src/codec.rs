//! Interrupt reply decoding
//!
//! The key answers a measurement request with an 8-byte interrupt report.
//! Bytes 2-3 hold the inner sensor and bytes 4-5 the outer sensor, each as a
//! big-endian 16-bit raw value. The raw value is scaled to milli-degrees with
//! the integer constant `125 / 32`.
//!
//! The constant is evaluated in integer arithmetic *before* the multiplication
//! and therefore equals 3, not 3.906. Deployed readings were produced that way
//! and must stay comparable, so the truncation is kept.

use byteorder::{BigEndian, ByteOrder};

use crate::types::Reading;

/// Offset of the inner sensor raw value in the reply
const INNER_OFFSET: usize = 2;

/// Offset of the outer sensor raw value in the reply
const OUTER_OFFSET: usize = 4;

/// Number of leading reply bytes that carry data
const DECODED_LEN: usize = 6;

/// Milli-degrees per raw unit (integer-truncated `125 / 32`)
pub const MILLI_C_PER_RAW: i32 = 125 / 32;

/// Extract the `(inner, outer)` raw values from a reply
///
/// Missing bytes of a short reply read as zero.
pub fn raw_values(reply: &[u8]) -> (u16, u16) {
    let mut frame = [0u8; DECODED_LEN];
    let len = reply.len().min(DECODED_LEN);
    frame[..len].copy_from_slice(&reply[..len]);

    (
        BigEndian::read_u16(&frame[INNER_OFFSET..INNER_OFFSET + 2]),
        BigEndian::read_u16(&frame[OUTER_OFFSET..OUTER_OFFSET + 2]),
    )
}

/// Decode an interrupt reply into calibrated milli-degree values
///
/// Pure and total: any byte sequence yields a reading. The wire format
/// guarantees at least 8 bytes, so a short reply only happens with a
/// misbehaving device and produces a meaningless (but defined) result.
pub fn decode(reply: &[u8]) -> Reading {
    let (inner_raw, outer_raw) = raw_values(reply);

    Reading {
        inner_milli_c: i32::from(inner_raw) * MILLI_C_PER_RAW,
        outer_milli_c: i32::from(outer_raw) * MILLI_C_PER_RAW,
    }
}
