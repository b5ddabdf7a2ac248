//! BER decoding.
//!
//! Zero-copy over [`Bytes`]. Every read checks the remaining buffer first and
//! fails with [`DecodeErrorKind::Incomplete`] when the item runs past the end.

use super::length::decode_length;
use super::tag;
use crate::error::{DecodeErrorKind, Error, Result};
use crate::oid::Oid;
use crate::value::{Value, ValueType};
use bytes::Bytes;

/// Decode a single BER value from the front of `data`.
///
/// Returns the value and the number of bytes consumed. When `expected` is
/// given, a value of a different type fails with
/// [`DecodeErrorKind::TypeMismatch`]; exception values are always accepted.
pub fn decode_value(data: &[u8], expected: Option<ValueType>) -> Result<(Value, usize)> {
    let mut decoder = Decoder::new(Bytes::copy_from_slice(data));
    let value = Value::decode(&mut decoder)?;
    if let Some(ty) = expected
        && !value.is_exception()
        && !ty.matches(&value)
    {
        return Err(Error::decode(0, DecodeErrorKind::TypeMismatch));
    }
    Ok((value, decoder.offset()))
}

/// BER decoder over a byte buffer.
pub struct Decoder {
    data: Bytes,
    offset: usize,
}

impl Decoder {
    /// Create a decoder over `data`.
    pub fn new(data: Bytes) -> Self {
        Self { data, offset: 0 }
    }

    /// Current position within the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Returns `true` when every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Look at the next tag without consuming it.
    pub fn peek_tag(&self) -> Result<u8> {
        self.data
            .get(self.offset)
            .copied()
            .ok_or_else(|| Error::incomplete(self.offset, 1))
    }

    /// Read a tag, length and contents. Returns the tag and the contents.
    pub fn read_tlv(&mut self) -> Result<(u8, Bytes)> {
        let start = self.offset;
        let tag = self.peek_tag()?;
        let (len, len_octets) = decode_length(&self.data[start + 1..], start + 1)?;
        let header = 1 + len_octets;
        let available = self.remaining() - header;
        if len > available {
            return Err(Error::incomplete(start, len - available));
        }
        let content = self.data.slice(start + header..start + header + len);
        self.offset = start + header + len;
        Ok((tag, content))
    }

    /// Read a TLV and check its tag.
    pub fn read_expected(&mut self, expected: u8) -> Result<Bytes> {
        let start = self.offset;
        let actual = self.peek_tag()?;
        if actual != expected {
            return Err(Error::decode(
                start,
                DecodeErrorKind::UnexpectedTag { expected, actual },
            ));
        }
        self.read_tlv().map(|(_, content)| content)
    }

    /// Read an INTEGER.
    pub fn read_integer(&mut self) -> Result<i32> {
        let start = self.offset;
        let content = self.read_expected(tag::universal::INTEGER)?;
        if content.is_empty() {
            return Err(Error::decode(start, DecodeErrorKind::ZeroLengthInteger));
        }
        if content.len() > 4 {
            return Err(Error::decode(start, DecodeErrorKind::IntegerOverflow));
        }
        let mut value: i32 = if content[0] & 0x80 != 0 { -1 } else { 0 };
        for &b in content.iter() {
            value = (value << 8) | b as i32;
        }
        Ok(value)
    }

    /// Read an unsigned 32-bit integer carried under `tag`.
    ///
    /// Accepts a redundant leading zero octet; values wider than 32 bits fail.
    pub fn read_unsigned32(&mut self, tag: u8) -> Result<u32> {
        let start = self.offset;
        let content = self.read_expected(tag)?;
        let value = unsigned_content(&content, 4)
            .map_err(|kind| Error::decode(start, kind))?;
        Ok(value as u32)
    }

    /// Read a 64-bit unsigned integer carried under `tag` (Counter64).
    pub fn read_integer64(&mut self, tag: u8) -> Result<u64> {
        let start = self.offset;
        let content = self.read_expected(tag)?;
        unsigned_content(&content, 8).map_err(|kind| match kind {
            DecodeErrorKind::IntegerOverflow => Error::decode(
                start,
                DecodeErrorKind::Integer64TooLong {
                    length: content.len(),
                },
            ),
            other => Error::decode(start, other),
        })
    }

    /// Read an OCTET STRING.
    pub fn read_octet_string(&mut self) -> Result<Bytes> {
        self.read_expected(tag::universal::OCTET_STRING)
    }

    /// Read a NULL.
    pub fn read_null(&mut self) -> Result<()> {
        let start = self.offset;
        let content = self.read_expected(tag::universal::NULL)?;
        if !content.is_empty() {
            return Err(Error::decode(start, DecodeErrorKind::InvalidNull));
        }
        Ok(())
    }

    /// Read an OBJECT IDENTIFIER.
    pub fn read_oid(&mut self) -> Result<Oid> {
        let start = self.offset;
        let content = self.read_expected(tag::universal::OBJECT_IDENTIFIER)?;
        Oid::from_ber(&content).map_err(|e| match e {
            Error::Decode { kind, .. } => Error::decode(start, kind),
            _ => Error::decode(start, DecodeErrorKind::InvalidOidEncoding),
        })
    }

    /// Read an IpAddress.
    pub fn read_ip_address(&mut self) -> Result<[u8; 4]> {
        let start = self.offset;
        let content = self.read_expected(tag::application::IP_ADDRESS)?;
        <[u8; 4]>::try_from(&content[..]).map_err(|_| {
            Error::decode(
                start,
                DecodeErrorKind::InvalidIpAddressLength {
                    length: content.len(),
                },
            )
        })
    }

    /// Read an Opaque special type: `0x9F kind length contents`.
    ///
    /// Returns the kind octet and the contents.
    pub fn read_opaque_special(&mut self) -> Result<(u8, Bytes)> {
        let start = self.offset;
        let first = self.peek_tag()?;
        if first != tag::opaque::EXTENSION_ID {
            return Err(Error::decode(
                start,
                DecodeErrorKind::UnexpectedTag {
                    expected: tag::opaque::EXTENSION_ID,
                    actual: first,
                },
            ));
        }
        let kind = *self
            .data
            .get(start + 1)
            .ok_or_else(|| Error::incomplete(start + 1, 1))?;
        self.offset = start + 1;
        // The kind octet now sits where read_tlv expects a tag.
        match self.read_tlv() {
            Ok((_, content)) => Ok((kind, content)),
            Err(e) => {
                self.offset = start;
                Err(e)
            }
        }
    }
}

/// Fold big-endian unsigned contents of at most `width` significant octets.
fn unsigned_content(content: &[u8], width: usize) -> std::result::Result<u64, DecodeErrorKind> {
    if content.is_empty() {
        return Err(DecodeErrorKind::ZeroLengthInteger);
    }
    let significant = match content {
        [0, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if significant.len() > width {
        return Err(DecodeErrorKind::IntegerOverflow);
    }
    Ok(significant
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ber::encode_value;
    use crate::oid;

    #[test]
    fn test_decode_integer() {
        let (v, n) = decode_value(&[0x02, 0x01, 0x2A], None).unwrap();
        assert_eq!(v, Value::Integer(42));
        assert_eq!(n, 3);
        let (v, _) = decode_value(&[0x02, 0x02, 0xFF, 0x7F], None).unwrap();
        assert_eq!(v, Value::Integer(-129));
    }

    #[test]
    fn test_decode_integer_errors() {
        assert!(matches!(
            decode_value(&[0x02, 0x00], None),
            Err(Error::Decode {
                kind: DecodeErrorKind::ZeroLengthInteger,
                ..
            })
        ));
        assert!(matches!(
            decode_value(&[0x02, 0x05, 1, 2, 3, 4, 5], None),
            Err(Error::Decode {
                kind: DecodeErrorKind::IntegerOverflow,
                ..
            })
        ));
    }

    #[test]
    fn test_decode_unsigned_with_leading_zero() {
        let (v, _) = decode_value(&[0x41, 0x05, 0x00, 0xFF, 0xFF, 0xFF, 0xFF], None).unwrap();
        assert_eq!(v, Value::Counter32(u32::MAX));
    }

    #[test]
    fn test_decode_incomplete() {
        // OCTET STRING declares 5 bytes, only 2 present
        let err = decode_value(&[0x04, 0x05, b'a', b'b'], None).unwrap_err();
        assert!(err.is_incomplete());
        assert!(matches!(
            err,
            Error::Decode {
                kind: DecodeErrorKind::Incomplete { needed: 3 },
                ..
            }
        ));
        assert!(decode_value(&[], None).unwrap_err().is_incomplete());
        assert!(decode_value(&[0x04], None).unwrap_err().is_incomplete());
    }

    #[test]
    fn test_decode_unknown_tag() {
        assert!(matches!(
            decode_value(&[0x13, 0x00], None),
            Err(Error::Decode {
                kind: DecodeErrorKind::UnknownTag(0x13),
                ..
            })
        ));
        // Constructed OCTET STRING is rejected
        assert!(matches!(
            decode_value(&[0x24, 0x00], None),
            Err(Error::Decode {
                kind: DecodeErrorKind::UnknownTag(0x24),
                ..
            })
        ));
    }

    #[test]
    fn test_decode_expected_type() {
        let bytes = encode_value(&Value::Gauge32(7));
        assert!(decode_value(&bytes, Some(ValueType::Unsigned32)).is_ok());
        assert!(matches!(
            decode_value(&bytes, Some(ValueType::Counter32)),
            Err(Error::Decode {
                kind: DecodeErrorKind::TypeMismatch,
                ..
            })
        ));
        let bytes = encode_value(&Value::NoSuchObject);
        assert!(decode_value(&bytes, Some(ValueType::Integer32)).is_ok());
    }

    #[test]
    fn test_decode_consumes_only_first_value() {
        let mut bytes = encode_value(&Value::ObjectIdentifier(oid!(1, 3, 6, 1))).to_vec();
        let first_len = bytes.len();
        bytes.extend_from_slice(&[0x05, 0x00]);
        let (v, n) = decode_value(&bytes, None).unwrap();
        assert_eq!(v, Value::ObjectIdentifier(oid!(1, 3, 6, 1)));
        assert_eq!(n, first_len);
    }

    #[test]
    fn test_decode_ip_address_length() {
        assert!(matches!(
            decode_value(&[0x40, 0x03, 1, 2, 3], None),
            Err(Error::Decode {
                kind: DecodeErrorKind::InvalidIpAddressLength { length: 3 },
                ..
            })
        ));
    }

    #[test]
    fn test_read_opaque_special() {
        let mut decoder = Decoder::new(Bytes::from_static(&[0x9F, 0x78, 0x04, 1, 2, 3, 4]));
        let (kind, content) = decoder.read_opaque_special().unwrap();
        assert_eq!(kind, tag::opaque::FLOAT);
        assert_eq!(&content[..], &[1, 2, 3, 4]);
        assert!(decoder.is_empty());
    }
}
