//! BER length encoding (X.690 §8.1.3).
//!
//! Short form for lengths below 128, long form with the minimum number of
//! octets otherwise. The indefinite form is rejected on decode.

use crate::error::{DecodeErrorKind, Error, Result};

/// Largest length accepted on decode. Opaque contents and OCTET STRING
/// values in AgentX are bounded far below this.
pub const MAX_LENGTH: usize = 0x00FF_FFFF;

/// Encode a length.
///
/// Returns the bytes in reverse order (for the reverse encode buffer) and
/// the number of valid bytes.
#[inline]
pub fn encode_length(len: usize) -> ([u8; 9], usize) {
    let mut out = [0u8; 9];
    if len < 0x80 {
        out[0] = len as u8;
        return (out, 1);
    }

    let mut count = 0;
    let mut remaining = len;
    while remaining > 0 {
        out[count] = (remaining & 0xFF) as u8;
        remaining >>= 8;
        count += 1;
    }
    out[count] = 0x80 | count as u8;
    (out, count + 1)
}

/// Decode a length starting at `data[0]`.
///
/// `offset` is the absolute position of `data` and is only used for error
/// reporting. Returns the length and the number of octets consumed.
pub fn decode_length(data: &[u8], offset: usize) -> Result<(usize, usize)> {
    let first = *data.first().ok_or_else(|| Error::incomplete(offset, 1))?;

    if first < 0x80 {
        return Ok((first as usize, 1));
    }
    if first == 0x80 {
        return Err(Error::decode(offset, DecodeErrorKind::IndefiniteLength));
    }

    let count = (first & 0x7F) as usize;
    if count > 4 {
        return Err(Error::decode(
            offset,
            DecodeErrorKind::LengthTooLong { octets: count },
        ));
    }
    if data.len() < 1 + count {
        return Err(Error::incomplete(offset, 1 + count - data.len()));
    }

    let len = data[1..=count]
        .iter()
        .fold(0usize, |acc, &b| (acc << 8) | b as usize);
    if len > MAX_LENGTH {
        return Err(Error::decode(offset, DecodeErrorKind::InvalidLength));
    }
    Ok((len, 1 + count))
}
