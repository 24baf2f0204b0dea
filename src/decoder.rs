//! Characteristic payload decoding.
//!
//! Both the temperature and the humidity characteristic use the same layout:
//!
//! | byte | meaning                                   |
//! |------|-------------------------------------------|
//! | 0    | reserved, ignored                         |
//! | 1-2  | value, unsigned 16-bit little-endian, ×100 |
//! | 3..  | ignored                                   |

use crate::fixed_point::FixedPoint;
use thiserror::Error;

/// Minimum payload length carrying a value.
pub const MIN_PAYLOAD_LEN: usize = 3;

/// Error types for decoding characteristic payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload is shorter than [`MIN_PAYLOAD_LEN`].
    #[error("payload too short: expected at least {min} bytes, got {len}", min = MIN_PAYLOAD_LEN)]
    TooShort { len: usize },
}

/// Decode a raw characteristic value into a physical quantity.
///
/// No range clamping is applied.
///
/// # Example
/// ```
/// use thermo_monitor::decoder::decode;
///
/// let value = decode(&[0x00, 0x34, 0x12]).unwrap();
/// assert_eq!(value.to_string(), "46.60");
/// ```
pub fn decode(data: &[u8]) -> Result<FixedPoint, DecodeError> {
    match data {
        [_, lo, hi, ..] => Ok(FixedPoint::from_hundredths(i32::from(u16::from_le_bytes([
            *lo, *hi,
        ])))),
        _ => Err(DecodeError::TooShort { len: data.len() }),
    }
}
