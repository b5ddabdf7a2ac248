//! Table index encoding (RFC 2578 §7.7).
//!
//! A row's instance suffix is the concatenation of its index values, each
//! encoded by its [`IndexType`]. Decoding walks the suffix structurally and
//! must consume every sub-identifier, so the mapping is injective in both
//! directions.

use std::fmt;
use std::net::Ipv4Addr;

use bytes::Bytes;

use crate::error::{Error, IndexErrorKind, Result};
use crate::oid::Oid;

/// SMI type of one table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IndexType {
    /// Non-negative INTEGER, one sub-identifier.
    Integer32,
    /// Unsigned32 / Gauge32, one sub-identifier.
    Unsigned32,
    /// Variable-length OCTET STRING, prefixed by its length.
    OctetString,
    /// OCTET STRING without length prefix. Last index only.
    ImpliedOctetString,
    /// OCTET STRING of exactly `n` octets, no length prefix.
    FixedOctetString(usize),
    /// IpAddress, four sub-identifiers.
    IpAddress,
    /// OBJECT IDENTIFIER, prefixed by its length.
    ObjectIdentifier,
    /// OBJECT IDENTIFIER without length prefix. Last index only.
    ImpliedObjectIdentifier,
}

impl IndexType {
    fn is_implied(&self) -> bool {
        matches!(
            self,
            IndexType::ImpliedOctetString | IndexType::ImpliedObjectIdentifier
        )
    }
}

/// Value of one table index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexValue {
    Integer(i32),
    Unsigned(u32),
    OctetString(Bytes),
    IpAddress([u8; 4]),
    ObjectIdentifier(Oid),
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::Integer(v) => write!(f, "{}", v),
            IndexValue::Unsigned(v) => write!(f, "{}", v),
            IndexValue::OctetString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "{:?}", s),
                Err(_) => {
                    for b in data.iter() {
                        write!(f, "{:02x}", b)?;
                    }
                    Ok(())
                }
            },
            IndexValue::IpAddress(ip) => write!(f, "{}", Ipv4Addr::from(*ip)),
            IndexValue::ObjectIdentifier(oid) => write!(f, "{}", oid),
        }
    }
}

impl From<i32> for IndexValue {
    fn from(v: i32) -> Self {
        IndexValue::Integer(v)
    }
}

impl From<u32> for IndexValue {
    fn from(v: u32) -> Self {
        IndexValue::Unsigned(v)
    }
}

impl From<&str> for IndexValue {
    fn from(s: &str) -> Self {
        IndexValue::OctetString(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for IndexValue {
    fn from(s: String) -> Self {
        IndexValue::OctetString(Bytes::from(s))
    }
}

impl From<Bytes> for IndexValue {
    fn from(data: Bytes) -> Self {
        IndexValue::OctetString(data)
    }
}

impl From<Ipv4Addr> for IndexValue {
    fn from(ip: Ipv4Addr) -> Self {
        IndexValue::IpAddress(ip.octets())
    }
}

impl From<Oid> for IndexValue {
    fn from(oid: Oid) -> Self {
        IndexValue::ObjectIdentifier(oid)
    }
}

/// Check an index list: at least one index, IMPLIED only in last position.
pub(crate) fn validate_types(types: &[IndexType]) -> Result<()> {
    if types.is_empty() {
        return Err(Error::index(IndexErrorKind::EmptyTable));
    }
    if types[..types.len() - 1].iter().any(IndexType::is_implied) {
        return Err(Error::index(IndexErrorKind::ImpliedNotLast));
    }
    Ok(())
}

/// Encode index values into an instance suffix.
pub fn encode_index(types: &[IndexType], values: &[IndexValue]) -> Result<Oid> {
    if types.len() != values.len() {
        return Err(Error::index(IndexErrorKind::WrongArity {
            expected: types.len(),
            actual: values.len(),
        }));
    }

    let mut arcs: Vec<u32> = Vec::new();
    for (position, (ty, value)) in types.iter().zip(values).enumerate() {
        let wrong_type = || Error::index(IndexErrorKind::WrongType { position });
        match (ty, value) {
            (IndexType::Integer32, IndexValue::Integer(v)) => {
                // INTEGER indexes are non-negative
                let v = u32::try_from(*v).map_err(|_| wrong_type())?;
                arcs.push(v);
            }
            (IndexType::Unsigned32, IndexValue::Unsigned(v)) => arcs.push(*v),
            (IndexType::OctetString, IndexValue::OctetString(data)) => {
                arcs.push(data.len() as u32);
                arcs.extend(data.iter().map(|&b| b as u32));
            }
            (IndexType::ImpliedOctetString, IndexValue::OctetString(data)) => {
                arcs.extend(data.iter().map(|&b| b as u32));
            }
            (IndexType::FixedOctetString(n), IndexValue::OctetString(data)) => {
                if data.len() != *n {
                    return Err(Error::index(IndexErrorKind::WrongLength {
                        position,
                        expected: *n,
                        actual: data.len(),
                    }));
                }
                arcs.extend(data.iter().map(|&b| b as u32));
            }
            (IndexType::IpAddress, IndexValue::IpAddress(ip)) => {
                arcs.extend(ip.iter().map(|&b| b as u32));
            }
            (IndexType::ObjectIdentifier, IndexValue::ObjectIdentifier(oid)) => {
                arcs.push(oid.len() as u32);
                arcs.extend_from_slice(oid.arcs());
            }
            (IndexType::ImpliedObjectIdentifier, IndexValue::ObjectIdentifier(oid)) => {
                arcs.extend_from_slice(oid.arcs());
            }
            _ => return Err(wrong_type()),
        }
    }

    let suffix = Oid::new(arcs);
    suffix.validate_length()?;
    Ok(suffix)
}

/// Decode an instance suffix into index values.
///
/// Fails with [`IndexErrorKind::MalformedSuffix`] unless the suffix is
/// consumed exactly.
pub fn decode_index(types: &[IndexType], suffix: &[u32]) -> Result<Vec<IndexValue>> {
    let malformed = || Error::index(IndexErrorKind::MalformedSuffix);
    let mut rest = suffix;
    let mut values = Vec::with_capacity(types.len());

    for ty in types {
        let value = match ty {
            IndexType::Integer32 => {
                let (&v, tail) = rest.split_first().ok_or_else(malformed)?;
                rest = tail;
                IndexValue::Integer(i32::try_from(v).map_err(|_| malformed())?)
            }
            IndexType::Unsigned32 => {
                let (&v, tail) = rest.split_first().ok_or_else(malformed)?;
                rest = tail;
                IndexValue::Unsigned(v)
            }
            IndexType::OctetString => {
                let (&len, tail) = rest.split_first().ok_or_else(malformed)?;
                let (bytes, tail) = take(tail, len as usize).ok_or_else(malformed)?;
                rest = tail;
                IndexValue::OctetString(octets(bytes).ok_or_else(malformed)?)
            }
            IndexType::ImpliedOctetString => {
                let bytes = std::mem::take(&mut rest);
                IndexValue::OctetString(octets(bytes).ok_or_else(malformed)?)
            }
            IndexType::FixedOctetString(n) => {
                let (bytes, tail) = take(rest, *n).ok_or_else(malformed)?;
                rest = tail;
                IndexValue::OctetString(octets(bytes).ok_or_else(malformed)?)
            }
            IndexType::IpAddress => {
                let (bytes, tail) = take(rest, 4).ok_or_else(malformed)?;
                rest = tail;
                let data = octets(bytes).ok_or_else(malformed)?;
                IndexValue::IpAddress([data[0], data[1], data[2], data[3]])
            }
            IndexType::ObjectIdentifier => {
                let (&len, tail) = rest.split_first().ok_or_else(malformed)?;
                let (arcs, tail) = take(tail, len as usize).ok_or_else(malformed)?;
                rest = tail;
                IndexValue::ObjectIdentifier(Oid::from_slice(arcs))
            }
            IndexType::ImpliedObjectIdentifier => {
                IndexValue::ObjectIdentifier(Oid::from_slice(std::mem::take(&mut rest)))
            }
        };
        values.push(value);
    }

    if !rest.is_empty() {
        return Err(malformed());
    }
    Ok(values)
}

fn take(arcs: &[u32], n: usize) -> Option<(&[u32], &[u32])> {
    (arcs.len() >= n).then(|| arcs.split_at(n))
}

fn octets(arcs: &[u32]) -> Option<Bytes> {
    arcs.iter()
        .map(|&a| u8::try_from(a).ok())
        .collect::<Option<Vec<u8>>>()
        .map(Bytes::from)
}
