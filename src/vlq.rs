//! Variable-length integers as used by BPS.
//!
//! Each byte carries 7 magnitude bits; a set high bit marks the final byte.
//! Unlike LEB128, every non-final byte also adds the next weight to the
//! value: `[0x00, 0x80]` is 128, not 0.

use crate::cursor::ByteCursor;
use crate::error::FormatError;

const DATA_MASK: u8 = 0x7f;
const END_BIT: u8 = 0x80;

/// Decode one unsigned value from the front of `bytes`.
/// Returns the value and the number of bytes it occupied.
pub fn decode_slice(bytes: &[u8]) -> Result<(u64, usize), FormatError> {
    let mut value: u64 = 0;
    let mut weight: u64 = 1;
    for (i, &byte) in bytes.iter().enumerate() {
        value = u64::from(byte & DATA_MASK)
            .checked_mul(weight)
            .and_then(|part| value.checked_add(part))
            .ok_or(FormatError::VlqOverflow)?;
        if byte & END_BIT != 0 {
            return Ok((value, i + 1));
        }
        weight = weight.checked_mul(128).ok_or(FormatError::VlqOverflow)?;
        value = value.checked_add(weight).ok_or(FormatError::VlqOverflow)?;
    }
    Err(FormatError::TruncatedInput)
}

/// Decode one unsigned value at the cursor and advance past it.
pub fn decode(cursor: &mut ByteCursor<'_>) -> Result<u64, FormatError> {
    let (value, consumed) = decode_slice(cursor.remaining())?;
    cursor.advance(consumed);
    Ok(value)
}

/// Decode a signed delta: bit 0 is the sign (1 = negative), the rest is the
/// magnitude.
pub fn decode_signed(cursor: &mut ByteCursor<'_>) -> Result<i64, FormatError> {
    let raw = decode(cursor)?;
    // raw >> 1 is below 2^63, so the cast is lossless.
    let magnitude = (raw >> 1) as i64;
    Ok(if raw & 1 == 1 { -magnitude } else { magnitude })
}

pub fn encode(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let low = (value & u64::from(DATA_MASK)) as u8;
        value >>= 7;
        if value == 0 {
            out.push(low | END_BIT);
            return;
        }
        out.push(low);
        value -= 1;
    }
}

pub fn encode_signed(value: i64, out: &mut Vec<u8>) {
    let sign = u64::from(value < 0);
    encode((value.unsigned_abs() << 1) | sign, out);
}
