//! Object Identifier (OID) type.
//!
//! OIDs are stored as a `SmallVec<[u32; 16]>`, which keeps typical MIB
//! instance identifiers on the stack.

use smallvec::SmallVec;

use crate::error::{DecodeErrorKind, Error, OidErrorKind, Result};

/// Maximum number of sub-identifiers in an OID (RFC 2741 §5.1, net-snmp `MAX_OID_LEN`).
pub const MAX_OID_LEN: usize = 128;

/// Object Identifier.
///
/// Ordering is lexicographic over the arcs: `1.3.6.1.2` < `1.3.6.1.2.1` < `1.3.6.1.3`.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid {
    arcs: SmallVec<[u32; 16]>,
}

impl Oid {
    /// Create an empty (null) OID.
    pub fn empty() -> Self {
        Self {
            arcs: SmallVec::new(),
        }
    }

    /// Create an OID from arcs.
    pub fn new(arcs: impl IntoIterator<Item = u32>) -> Self {
        Self {
            arcs: arcs.into_iter().collect(),
        }
    }

    /// Create an OID from a slice of arcs.
    pub fn from_slice(arcs: &[u32]) -> Self {
        Self {
            arcs: SmallVec::from_slice(arcs),
        }
    }

    /// Parse dotted notation (`1.3.6.1` or `.1.3.6.1`).
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.strip_prefix('.').unwrap_or(s);
        if trimmed.is_empty() {
            return Err(Error::invalid_oid_with_input(OidErrorKind::Empty, s));
        }

        let mut arcs = SmallVec::new();
        for part in trimmed.split('.') {
            let arc: u32 = part
                .parse()
                .map_err(|_| Error::invalid_oid_with_input(OidErrorKind::InvalidArc, s))?;
            arcs.push(arc);
        }

        let oid = Self { arcs };
        oid.validate_length()?;
        Ok(oid)
    }

    /// Check the arc count against [`MAX_OID_LEN`].
    pub fn validate_length(&self) -> Result<()> {
        if self.arcs.len() > MAX_OID_LEN {
            return Err(Error::invalid_oid(OidErrorKind::TooManyArcs {
                count: self.arcs.len(),
                max: MAX_OID_LEN,
            }));
        }
        Ok(())
    }

    /// Get the arcs.
    pub fn arcs(&self) -> &[u32] {
        &self.arcs
    }

    /// Number of arcs.
    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    /// Check for the null OID.
    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    /// Check if this OID starts with `prefix` (an OID is a prefix of itself).
    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.arcs.len() >= prefix.arcs.len() && self.arcs[..prefix.arcs.len()] == prefix.arcs[..]
    }

    /// Return a new OID with one more arc.
    pub fn child(&self, arc: u32) -> Oid {
        let mut arcs = self.arcs.clone();
        arcs.push(arc);
        Oid { arcs }
    }

    /// Return a new OID with `suffix` appended.
    pub fn concat(&self, suffix: &[u32]) -> Oid {
        let mut arcs = self.arcs.clone();
        arcs.extend_from_slice(suffix);
        Oid { arcs }
    }

    /// Arcs after `prefix`, if this OID starts with it.
    pub fn strip_prefix(&self, prefix: &Oid) -> Option<&[u32]> {
        if self.starts_with(prefix) {
            Some(&self.arcs[prefix.arcs.len()..])
        } else {
            None
        }
    }

    /// The smallest OID that is greater than every OID in this subtree.
    ///
    /// Returns `None` when no such OID exists (every arc is `u32::MAX`).
    pub fn subtree_end(&self) -> Option<Oid> {
        let mut arcs = self.arcs.clone();
        while let Some(last) = arcs.pop() {
            if last < u32::MAX {
                arcs.push(last + 1);
                return Some(Oid { arcs });
            }
        }
        None
    }

    /// Encode to BER content octets (without tag and length).
    ///
    /// The first two arcs are combined as `40 * a + b` (X.690 §8.19).
    /// A single-arc OID encodes as if its second arc were zero.
    pub fn to_ber_smallvec(&self) -> SmallVec<[u8; 64]> {
        let mut out = SmallVec::new();
        if self.arcs.is_empty() {
            return out;
        }

        let first = self.arcs[0];
        let second = self.arcs.get(1).copied().unwrap_or(0);
        push_base128(&mut out, first as u64 * 40 + second as u64);
        for &arc in self.arcs.iter().skip(2) {
            push_base128(&mut out, arc as u64);
        }
        out
    }

    /// Decode from BER content octets.
    pub fn from_ber(data: &[u8]) -> Result<Self> {
        let mut arcs = SmallVec::new();
        if data.is_empty() {
            return Ok(Self { arcs });
        }

        let mut value: u64 = 0;
        let mut first = true;
        for (i, &byte) in data.iter().enumerate() {
            // Leading 0x80 is a non-minimal encoding
            if value == 0 && byte == 0x80 {
                return Err(Error::decode(i, DecodeErrorKind::InvalidOidEncoding));
            }
            value = (value << 7) | (byte & 0x7F) as u64;
            if value > u32::MAX as u64 * 40 + 39 {
                return Err(Error::decode(i, DecodeErrorKind::IntegerOverflow));
            }
            if byte & 0x80 == 0 {
                if first {
                    let (a, b) = if value < 40 {
                        (0, value)
                    } else if value < 80 {
                        (1, value - 40)
                    } else {
                        (2, value - 80)
                    };
                    if b > u32::MAX as u64 {
                        return Err(Error::decode(i, DecodeErrorKind::IntegerOverflow));
                    }
                    arcs.push(a as u32);
                    arcs.push(b as u32);
                    first = false;
                } else {
                    if value > u32::MAX as u64 {
                        return Err(Error::decode(i, DecodeErrorKind::IntegerOverflow));
                    }
                    arcs.push(value as u32);
                }
                value = 0;
            }
        }

        if data[data.len() - 1] & 0x80 != 0 {
            return Err(Error::decode(
                data.len(),
                DecodeErrorKind::InvalidOidEncoding,
            ));
        }
        if arcs.len() > MAX_OID_LEN {
            return Err(Error::decode(
                0,
                DecodeErrorKind::OidTooLong {
                    count: arcs.len(),
                    max: MAX_OID_LEN,
                },
            ));
        }
        Ok(Self { arcs })
    }
}

fn push_base128(out: &mut SmallVec<[u8; 64]>, mut value: u64) {
    let mut tmp = [0u8; 10];
    let mut i = tmp.len();
    loop {
        i -= 1;
        tmp[i] = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    let last = tmp.len() - 1;
    for (pos, byte) in tmp.iter().enumerate().skip(i) {
        out.push(if pos == last { *byte } else { byte | 0x80 });
    }
}

impl std::fmt::Debug for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Oid({})", self)
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for arc in &self.arcs {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", arc)?;
            first = false;
        }
        Ok(())
    }
}

impl std::str::FromStr for Oid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<&[u32]> for Oid {
    fn from(arcs: &[u32]) -> Self {
        Self::from_slice(arcs)
    }
}

impl<const N: usize> From<[u32; N]> for Oid {
    fn from(arcs: [u32; N]) -> Self {
        Self::from_slice(&arcs)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Oid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Oid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Oid::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Build an [`Oid`] from a list of arcs.
///
/// ```rust
/// use async_agentx::oid;
///
/// let sys_descr = oid!(1, 3, 6, 1, 2, 1, 1, 1, 0);
/// assert_eq!(sys_descr.to_string(), "1.3.6.1.2.1.1.1.0");
/// ```
#[macro_export]
macro_rules! oid {
    () => {
        $crate::oid::Oid::empty()
    };
    ($($arc:expr),+ $(,)?) => {
        $crate::oid::Oid::from_slice(&[$($arc as u32),+])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;

    #[test]
    fn test_parse_and_display() {
        let o = Oid::parse("1.3.6.1.4.1.99999").unwrap();
        assert_eq!(o.arcs(), &[1, 3, 6, 1, 4, 1, 99999]);
        assert_eq!(o.to_string(), "1.3.6.1.4.1.99999");

        let leading_dot = Oid::parse(".1.3.6.1").unwrap();
        assert_eq!(leading_dot, oid!(1, 3, 6, 1));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Oid::parse("").is_err());
        assert!(Oid::parse(".").is_err());
        assert!(Oid::parse("1.3.x").is_err());
        assert!(Oid::parse("1..3").is_err());

        let too_long = vec!["1"; MAX_OID_LEN + 1].join(".");
        assert!(matches!(
            Oid::parse(&too_long),
            Err(Error::InvalidOid {
                kind: OidErrorKind::TooManyArcs { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_ordering() {
        let a = oid!(1, 3, 6, 1, 4, 1);
        let b = oid!(1, 3, 6, 1, 4, 2);
        let c = oid!(1, 3, 6, 1, 4, 1, 0);
        assert!(a < b);
        assert!(a < c);
        assert!(c < b);
        assert!(Oid::empty() < a);
    }

    #[test]
    fn test_starts_with_and_strip_prefix() {
        let parent = oid!(1, 3, 6, 1, 4);
        let child = oid!(1, 3, 6, 1, 4, 1, 99999);
        assert!(child.starts_with(&parent));
        assert!(parent.starts_with(&parent));
        assert!(!parent.starts_with(&child));
        assert_eq!(child.strip_prefix(&parent), Some(&[1, 99999][..]));
        assert_eq!(parent.strip_prefix(&child), None);
    }

    #[test]
    fn test_subtree_end() {
        assert_eq!(oid!(1, 3, 6).subtree_end(), Some(oid!(1, 3, 7)));
        assert_eq!(oid!(1, u32::MAX).subtree_end(), Some(oid!(2)));
        assert_eq!(oid!(u32::MAX).subtree_end(), None);
    }

    #[test]
    fn test_ber_known_encoding() {
        // 1.3.6.1.4.1.311 -> 2B 06 01 04 01 82 37
        let o = oid!(1, 3, 6, 1, 4, 1, 311);
        assert_eq!(
            o.to_ber_smallvec().as_slice(),
            &[0x2B, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37]
        );
        assert_eq!(Oid::from_ber(&o.to_ber_smallvec()).unwrap(), o);
    }

    #[test]
    fn test_ber_rejects_truncated_arc() {
        assert!(Oid::from_ber(&[0x2B, 0x82]).is_err());
        assert!(Oid::from_ber(&[0x2B, 0x80, 0x01]).is_err());
    }

    #[test]
    fn test_child_and_concat() {
        let base = oid!(1, 3, 6, 1);
        assert_eq!(base.child(4), oid!(1, 3, 6, 1, 4));
        assert_eq!(base.concat(&[4, 1]), oid!(1, 3, 6, 1, 4, 1));
    }
}
