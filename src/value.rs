//! SNMP value types carried in AgentX varbinds.

use bytes::Bytes;

use crate::ber::{Decoder, EncodeBuf, tag};
use crate::error::{DecodeErrorKind, Error, Result};
use crate::oid::Oid;

/// AgentX VarBind type codes (RFC 2741 §5.4).
pub mod wire_type {
    pub const INTEGER: u16 = 2;
    pub const OCTET_STRING: u16 = 4;
    pub const NULL: u16 = 5;
    pub const OBJECT_IDENTIFIER: u16 = 6;
    pub const IP_ADDRESS: u16 = 64;
    pub const COUNTER32: u16 = 65;
    pub const GAUGE32: u16 = 66;
    pub const TIMETICKS: u16 = 67;
    pub const OPAQUE: u16 = 68;
    pub const COUNTER64: u16 = 70;
    pub const NO_SUCH_OBJECT: u16 = 128;
    pub const NO_SUCH_INSTANCE: u16 = 129;
    pub const END_OF_MIB_VIEW: u16 = 130;
}

/// Declared type of a registered object.
///
/// `DisplayString` travels as an OCTET STRING but is restricted to
/// printable ASCII of at most 255 octets (RFC 2579).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueType {
    Integer32,
    Unsigned32,
    Counter32,
    Counter64,
    TimeTicks,
    IpAddress,
    OctetString,
    DisplayString,
    ObjectIdentifier,
    Opaque,
    Null,
}

impl ValueType {
    /// Check whether `value` is an instance of this type.
    pub fn matches(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ValueType::Integer32, Value::Integer(_))
                | (ValueType::Unsigned32, Value::Gauge32(_))
                | (ValueType::Counter32, Value::Counter32(_))
                | (ValueType::Counter64, Value::Counter64(_))
                | (ValueType::TimeTicks, Value::TimeTicks(_))
                | (ValueType::IpAddress, Value::IpAddress(_))
                | (ValueType::OctetString, Value::OctetString(_))
                | (ValueType::DisplayString, Value::OctetString(_))
                | (ValueType::ObjectIdentifier, Value::ObjectIdentifier(_))
                | (ValueType::Opaque, Value::Opaque(_))
                | (ValueType::Null, Value::Null)
        )
    }

    /// The zero value for this type, used as a default initial value.
    pub fn default_value(&self) -> Value {
        match self {
            ValueType::Integer32 => Value::Integer(0),
            ValueType::Unsigned32 => Value::Gauge32(0),
            ValueType::Counter32 => Value::Counter32(0),
            ValueType::Counter64 => Value::Counter64(0),
            ValueType::TimeTicks => Value::TimeTicks(0),
            ValueType::IpAddress => Value::IpAddress([0, 0, 0, 0]),
            ValueType::OctetString | ValueType::DisplayString => Value::OctetString(Bytes::new()),
            ValueType::ObjectIdentifier => Value::ObjectIdentifier(Oid::empty()),
            ValueType::Opaque => Value::Opaque(Bytes::new()),
            ValueType::Null => Value::Null,
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueType::Integer32 => "Integer32",
            ValueType::Unsigned32 => "Unsigned32",
            ValueType::Counter32 => "Counter32",
            ValueType::Counter64 => "Counter64",
            ValueType::TimeTicks => "TimeTicks",
            ValueType::IpAddress => "IpAddress",
            ValueType::OctetString => "OctetString",
            ValueType::DisplayString => "DisplayString",
            ValueType::ObjectIdentifier => "ObjectIdentifier",
            ValueType::Opaque => "Opaque",
            ValueType::Null => "Null",
        };
        f.write_str(name)
    }
}

/// SNMP value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// INTEGER / Integer32
    Integer(i32),
    /// OCTET STRING (also DisplayString)
    OctetString(Bytes),
    /// NULL
    Null,
    /// OBJECT IDENTIFIER
    ObjectIdentifier(Oid),
    /// IpAddress (network byte order)
    IpAddress([u8; 4]),
    /// Counter32
    Counter32(u32),
    /// Gauge32 / Unsigned32
    Gauge32(u32),
    /// TimeTicks (hundredths of a second)
    TimeTicks(u32),
    /// Opaque (BER-encoded contents, see [`OpaqueValue`])
    Opaque(Bytes),
    /// Counter64
    Counter64(u64),
    /// noSuchObject exception
    NoSuchObject,
    /// noSuchInstance exception
    NoSuchInstance,
    /// endOfMibView exception
    EndOfMibView,
}

impl Value {
    /// Check for the three exception values.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
        )
    }

    /// AgentX VarBind type code (RFC 2741 §5.4).
    pub fn wire_type(&self) -> u16 {
        match self {
            Value::Integer(_) => wire_type::INTEGER,
            Value::OctetString(_) => wire_type::OCTET_STRING,
            Value::Null => wire_type::NULL,
            Value::ObjectIdentifier(_) => wire_type::OBJECT_IDENTIFIER,
            Value::IpAddress(_) => wire_type::IP_ADDRESS,
            Value::Counter32(_) => wire_type::COUNTER32,
            Value::Gauge32(_) => wire_type::GAUGE32,
            Value::TimeTicks(_) => wire_type::TIMETICKS,
            Value::Opaque(_) => wire_type::OPAQUE,
            Value::Counter64(_) => wire_type::COUNTER64,
            Value::NoSuchObject => wire_type::NO_SUCH_OBJECT,
            Value::NoSuchInstance => wire_type::NO_SUCH_INSTANCE,
            Value::EndOfMibView => wire_type::END_OF_MIB_VIEW,
        }
    }

    /// Build an Opaque value holding a net-snmp `Float`.
    pub fn opaque_float(v: f32) -> Self {
        Value::Opaque(OpaqueValue::Float(v).to_bytes())
    }

    /// Build an Opaque value holding a net-snmp `Double`.
    pub fn opaque_double(v: f64) -> Self {
        Value::Opaque(OpaqueValue::Double(v).to_bytes())
    }

    /// Interpret an Opaque value's contents.
    pub fn as_opaque(&self) -> Option<OpaqueValue> {
        match self {
            Value::Opaque(data) => Some(OpaqueValue::parse(data)),
            _ => None,
        }
    }

    /// Get an integer value as i64 when the type is numeric.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v as i64),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Some(*v as i64),
            Value::Counter64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Encode to BER.
    pub fn encode(&self, buf: &mut EncodeBuf) {
        match self {
            Value::Integer(v) => buf.push_integer(*v),
            Value::OctetString(data) => buf.push_octet_string(data),
            Value::Null => buf.push_null(),
            Value::ObjectIdentifier(oid) => buf.push_oid(oid),
            Value::IpAddress(addr) => buf.push_ip_address(*addr),
            Value::Counter32(v) => buf.push_unsigned32(tag::application::COUNTER32, *v),
            Value::Gauge32(v) => buf.push_unsigned32(tag::application::GAUGE32, *v),
            Value::TimeTicks(v) => buf.push_unsigned32(tag::application::TIMETICKS, *v),
            Value::Opaque(data) => buf.push_primitive(tag::application::OPAQUE, data),
            Value::Counter64(v) => buf.push_integer64(*v),
            Value::NoSuchObject => {
                buf.push_length(0);
                buf.push_tag(tag::context::NO_SUCH_OBJECT);
            }
            Value::NoSuchInstance => {
                buf.push_length(0);
                buf.push_tag(tag::context::NO_SUCH_INSTANCE);
            }
            Value::EndOfMibView => {
                buf.push_length(0);
                buf.push_tag(tag::context::END_OF_MIB_VIEW);
            }
        }
    }

    /// Decode from BER.
    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let start = decoder.offset();
        let tag = decoder.peek_tag()?;
        match tag {
            tag::universal::INTEGER => Ok(Value::Integer(decoder.read_integer()?)),
            tag::universal::OCTET_STRING => Ok(Value::OctetString(decoder.read_octet_string()?)),
            tag::universal::OCTET_STRING_CONSTRUCTED => {
                Err(Error::decode(start, DecodeErrorKind::UnknownTag(tag)))
            }
            tag::universal::NULL => {
                decoder.read_null()?;
                Ok(Value::Null)
            }
            tag::universal::OBJECT_IDENTIFIER => Ok(Value::ObjectIdentifier(decoder.read_oid()?)),
            tag::application::IP_ADDRESS => Ok(Value::IpAddress(decoder.read_ip_address()?)),
            tag::application::COUNTER32 => Ok(Value::Counter32(
                decoder.read_unsigned32(tag::application::COUNTER32)?,
            )),
            tag::application::GAUGE32 => Ok(Value::Gauge32(
                decoder.read_unsigned32(tag::application::GAUGE32)?,
            )),
            tag::application::TIMETICKS => Ok(Value::TimeTicks(
                decoder.read_unsigned32(tag::application::TIMETICKS)?,
            )),
            tag::application::OPAQUE => {
                let (_, data) = decoder.read_tlv()?;
                Ok(Value::Opaque(data))
            }
            tag::application::COUNTER64 => Ok(Value::Counter64(
                decoder.read_integer64(tag::application::COUNTER64)?,
            )),
            tag::context::NO_SUCH_OBJECT
            | tag::context::NO_SUCH_INSTANCE
            | tag::context::END_OF_MIB_VIEW => {
                let (_, data) = decoder.read_tlv()?;
                if !data.is_empty() {
                    return Err(Error::decode(start, DecodeErrorKind::InvalidNull));
                }
                Ok(match tag {
                    tag::context::NO_SUCH_OBJECT => Value::NoSuchObject,
                    tag::context::NO_SUCH_INSTANCE => Value::NoSuchInstance,
                    _ => Value::EndOfMibView,
                })
            }
            other => Err(Error::decode(start, DecodeErrorKind::UnknownTag(other))),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::OctetString(data) => match std::str::from_utf8(data) {
                Ok(s) if s.chars().all(|c| !c.is_control() || c.is_whitespace()) => {
                    write!(f, "{}", s)
                }
                _ => {
                    for (i, b) in data.iter().enumerate() {
                        if i > 0 {
                            write!(f, " ")?;
                        }
                        write!(f, "{:02X}", b)?;
                    }
                    Ok(())
                }
            },
            Value::Null => write!(f, "NULL"),
            Value::ObjectIdentifier(oid) => write!(f, "{}", oid),
            Value::IpAddress([a, b, c, d]) => write!(f, "{}.{}.{}.{}", a, b, c, d),
            Value::Counter32(v) | Value::Gauge32(v) => write!(f, "{}", v),
            Value::TimeTicks(v) => write!(f, "({}) ", v).and_then(|_| {
                let secs = v / 100;
                write!(
                    f,
                    "{}:{:02}:{:02}.{:02}",
                    secs / 3600,
                    (secs / 60) % 60,
                    secs % 60,
                    v % 100
                )
            }),
            Value::Opaque(_) => match self.as_opaque() {
                Some(OpaqueValue::Raw(data)) => write!(f, "Opaque({} bytes)", data.len()),
                Some(inner) => write!(f, "{}", inner),
                None => Ok(()),
            },
            Value::Counter64(v) => write!(f, "{}", v),
            Value::NoSuchObject => write!(f, "noSuchObject"),
            Value::NoSuchInstance => write!(f, "noSuchInstance"),
            Value::EndOfMibView => write!(f, "endOfMibView"),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::OctetString(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::OctetString(Bytes::from(s))
    }
}

impl From<Oid> for Value {
    fn from(oid: Oid) -> Self {
        Value::ObjectIdentifier(oid)
    }
}

impl From<std::net::Ipv4Addr> for Value {
    fn from(addr: std::net::Ipv4Addr) -> Self {
        Value::IpAddress(addr.octets())
    }
}

/// Opaque special types used by net-snmp (draft-perkins-opaque-01).
///
/// The Opaque contents are themselves BER: a two-octet tag `0x9F 0x78..0x7B`
/// (or `0x9F 0x76` for Counter64), a length, and the payload.
#[derive(Debug, Clone, PartialEq)]
pub enum OpaqueValue {
    Float(f32),
    Double(f64),
    Counter64(u64),
    Integer64(i64),
    Unsigned64(u64),
    /// Contents that are not one of the special types.
    Raw(Bytes),
}

impl OpaqueValue {
    /// Encode to the Opaque contents octets.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = EncodeBuf::with_capacity(16);
        match self {
            OpaqueValue::Float(v) => {
                buf.push_bytes(&v.to_be_bytes());
                buf.push_length(4);
                buf.push_opaque_tag(tag::opaque::FLOAT);
            }
            OpaqueValue::Double(v) => {
                buf.push_bytes(&v.to_be_bytes());
                buf.push_length(8);
                buf.push_opaque_tag(tag::opaque::DOUBLE);
            }
            OpaqueValue::Counter64(v) => {
                buf.push_unsigned64_content(*v);
                buf.push_opaque_tag(tag::opaque::COUNTER64);
            }
            OpaqueValue::Integer64(v) => {
                buf.push_signed64_content(*v);
                buf.push_opaque_tag(tag::opaque::INTEGER64);
            }
            OpaqueValue::Unsigned64(v) => {
                buf.push_unsigned64_content(*v);
                buf.push_opaque_tag(tag::opaque::UNSIGNED64);
            }
            OpaqueValue::Raw(data) => return data.clone(),
        }
        buf.finish()
    }

    /// Parse Opaque contents. Anything that is not a well-formed special
    /// type is returned as [`OpaqueValue::Raw`].
    pub fn parse(data: &Bytes) -> Self {
        let mut decoder = Decoder::new(data.clone());
        match decoder.read_opaque_special() {
            Ok((kind, content)) if decoder.is_empty() => {
                Self::from_special(kind, &content).unwrap_or_else(|| OpaqueValue::Raw(data.clone()))
            }
            _ => OpaqueValue::Raw(data.clone()),
        }
    }

    fn from_special(kind: u8, content: &[u8]) -> Option<Self> {
        match kind {
            tag::opaque::FLOAT => Some(OpaqueValue::Float(f32::from_be_bytes(
                content.try_into().ok()?,
            ))),
            tag::opaque::DOUBLE => Some(OpaqueValue::Double(f64::from_be_bytes(
                content.try_into().ok()?,
            ))),
            tag::opaque::COUNTER64 => unsigned64(content).map(OpaqueValue::Counter64),
            tag::opaque::UNSIGNED64 => unsigned64(content).map(OpaqueValue::Unsigned64),
            tag::opaque::INTEGER64 => {
                if content.is_empty() || content.len() > 8 {
                    return None;
                }
                let mut v: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
                for &b in content {
                    v = (v << 8) | b as i64;
                }
                Some(OpaqueValue::Integer64(v))
            }
            _ => None,
        }
    }
}

fn unsigned64(content: &[u8]) -> Option<u64> {
    let content = match content {
        [0, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if content.is_empty() || content.len() > 8 {
        return None;
    }
    Some(content.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

impl std::fmt::Display for OpaqueValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpaqueValue::Float(v) => write!(f, "{}", v),
            OpaqueValue::Double(v) => write!(f, "{}", v),
            OpaqueValue::Counter64(v) | OpaqueValue::Unsigned64(v) => write!(f, "{}", v),
            OpaqueValue::Integer64(v) => write!(f, "{}", v),
            OpaqueValue::Raw(data) => write!(f, "Opaque({} bytes)", data.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;

    fn roundtrip(value: &Value) -> Value {
        let mut buf = EncodeBuf::new();
        value.encode(&mut buf);
        let mut decoder = Decoder::new(buf.finish());
        let decoded = Value::decode(&mut decoder).unwrap();
        assert!(decoder.is_empty());
        decoded
    }

    #[test]
    fn test_value_type_matches() {
        assert!(ValueType::Integer32.matches(&Value::Integer(1)));
        assert!(ValueType::Unsigned32.matches(&Value::Gauge32(1)));
        assert!(ValueType::DisplayString.matches(&Value::from("x")));
        assert!(!ValueType::Counter32.matches(&Value::Gauge32(1)));
        assert!(!ValueType::Integer32.matches(&Value::NoSuchObject));
    }

    #[test]
    fn test_ber_value_roundtrip() {
        let values = [
            Value::Integer(-129),
            Value::OctetString(Bytes::from_static(b"hello")),
            Value::Null,
            Value::ObjectIdentifier(oid!(1, 3, 6, 1, 4, 1, 8072)),
            Value::IpAddress([192, 168, 0, 1]),
            Value::Counter32(u32::MAX),
            Value::Gauge32(0),
            Value::TimeTicks(12345),
            Value::Counter64(u64::MAX),
            Value::opaque_float(3.4),
            Value::opaque_double(-1.5e300),
            Value::Opaque(Bytes::from_static(&[0xde, 0xad])),
            Value::NoSuchObject,
            Value::NoSuchInstance,
            Value::EndOfMibView,
        ];
        for v in &values {
            assert_eq!(&roundtrip(v), v);
        }
    }

    #[test]
    fn test_opaque_float_encoding() {
        // net-snmp: 9F 78 04 <ieee754>
        let bytes = OpaqueValue::Float(1.0).to_bytes();
        assert_eq!(&bytes[..], &[0x9F, 0x78, 0x04, 0x3F, 0x80, 0x00, 0x00]);
        assert_eq!(OpaqueValue::parse(&bytes), OpaqueValue::Float(1.0));
    }

    #[test]
    fn test_opaque_64bit_types() {
        for v in [
            OpaqueValue::Counter64(u64::MAX),
            OpaqueValue::Unsigned64(255),
            OpaqueValue::Integer64(-2),
            OpaqueValue::Integer64(i64::MIN),
            OpaqueValue::Double(-0.5),
        ] {
            assert_eq!(OpaqueValue::parse(&v.to_bytes()), v);
        }
    }

    #[test]
    fn test_opaque_raw_passthrough() {
        let raw = Bytes::from_static(&[0x01, 0x02, 0x03]);
        assert_eq!(OpaqueValue::parse(&raw), OpaqueValue::Raw(raw.clone()));
        assert_eq!(OpaqueValue::Raw(raw.clone()).to_bytes(), raw);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Integer(42).to_string(), "42");
        assert_eq!(Value::IpAddress([10, 0, 0, 1]).to_string(), "10.0.0.1");
        assert_eq!(Value::from("abc").to_string(), "abc");
        assert_eq!(Value::TimeTicks(360_001).to_string(), "(360001) 1:00:00.01");
        assert_eq!(Value::EndOfMibView.to_string(), "endOfMibView");
    }
}
