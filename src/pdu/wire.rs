//! AgentX payload primitives (RFC 2741 §5).
//!
//! Writers always emit network byte order. [`Reader`] follows the byte order
//! of the PDU it is reading.

use bytes::{BufMut, Bytes};

use super::header::ByteOrder;
use crate::error::{DecodeErrorKind, Error, Result};
use crate::oid::{MAX_OID_LEN, Oid};
use crate::value::{Value, wire_type};
use crate::varbind::VarBind;

/// Internet prefix `1.3.6.1` compressed by the OID `prefix` field.
const INTERNET: [u32; 4] = [1, 3, 6, 1];

/// A SearchRange (RFC 2741 §5.2).
///
/// `end` is empty when the range is unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRange {
    pub start: Oid,
    pub include: bool,
    pub end: Oid,
}

impl SearchRange {
    /// Range starting at `start` (exclusive) with no upper bound.
    pub fn new(start: Oid) -> Self {
        Self {
            start,
            include: false,
            end: Oid::empty(),
        }
    }

    /// Make `start` itself part of the range.
    pub fn including(mut self) -> Self {
        self.include = true;
        self
    }

    /// Bound the range above by `end` (exclusive).
    pub fn until(mut self, end: Oid) -> Self {
        self.end = end;
        self
    }

    /// Returns `true` if `oid` lies before the end of this range.
    pub fn is_before_end(&self, oid: &Oid) -> bool {
        self.end.is_empty() || oid < &self.end
    }
}

/// Size of an encoded OID.
pub fn oid_len(oid: &Oid) -> usize {
    let (_, rest) = split_prefix(oid);
    4 + rest.len() * 4
}

fn split_prefix(oid: &Oid) -> (u8, &[u32]) {
    let arcs = oid.arcs();
    if arcs.len() >= 5 && arcs[..4] == INTERNET && (1..=255).contains(&arcs[4]) {
        (arcs[4] as u8, &arcs[5..])
    } else {
        (0, arcs)
    }
}

/// Write an OID with internet-prefix compression.
///
/// Fails without writing when `oid` has more than [`MAX_OID_LEN`] arcs.
pub fn put_oid(buf: &mut impl BufMut, oid: &Oid, include: bool) -> Result<()> {
    oid.validate_length()?;
    let (prefix, rest) = split_prefix(oid);
    buf.put_u8(rest.len() as u8);
    buf.put_u8(prefix);
    buf.put_u8(include as u8);
    buf.put_u8(0);
    for &arc in rest {
        buf.put_u32(arc);
    }
    Ok(())
}

/// Write an octet string with its length and padding to a 4-byte boundary.
pub fn put_octet_string(buf: &mut impl BufMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
    buf.put_bytes(0, padding(data.len()));
}

/// Write a SearchRange.
pub fn put_search_range(buf: &mut impl BufMut, range: &SearchRange) -> Result<()> {
    put_oid(buf, &range.start, range.include)?;
    put_oid(buf, &range.end, false)
}

/// Write a VarBind.
pub fn put_varbind(buf: &mut impl BufMut, vb: &VarBind) -> Result<()> {
    vb.oid.validate_length()?;
    if let Value::ObjectIdentifier(oid) = &vb.value {
        oid.validate_length()?;
    }
    buf.put_u16(vb.value.wire_type());
    buf.put_u16(0);
    put_oid(buf, &vb.oid, false)?;
    match &vb.value {
        Value::Integer(v) => buf.put_i32(*v),
        Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => buf.put_u32(*v),
        Value::Counter64(v) => buf.put_u64(*v),
        Value::OctetString(data) | Value::Opaque(data) => put_octet_string(buf, data),
        Value::IpAddress(addr) => put_octet_string(buf, addr),
        Value::ObjectIdentifier(oid) => put_oid(buf, oid, false)?,
        Value::Null | Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView => {}
    }
    Ok(())
}

/// Write a VarBind list (no count prefix; the list runs to the end of the payload).
pub fn put_varbinds(buf: &mut impl BufMut, varbinds: &[VarBind]) -> Result<()> {
    varbinds.iter().try_for_each(|vb| put_varbind(buf, vb))
}

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Cursor over one PDU payload.
///
/// Offsets in errors are relative to the start of the payload.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8], order: ByteOrder) -> Self {
        Self { buf, pos: 0, order }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns `true` when the whole payload has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let available = self.buf.len() - self.pos;
        if n > available {
            return Err(Error::incomplete(self.pos, n - available));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(self.order.u16(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(self.order.u32(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(self.order.u64(self.array()?))
    }

    /// Skip reserved bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Read an OID and its include flag.
    pub fn oid(&mut self) -> Result<(Oid, bool)> {
        let start = self.pos;
        let n_subid = self.u8()? as usize;
        let prefix = self.u8()?;
        let include = self.u8()? != 0;
        self.skip(1)?;

        let total = n_subid + if prefix != 0 { 5 } else { 0 };
        if total > MAX_OID_LEN {
            return Err(Error::decode(
                start,
                DecodeErrorKind::OidTooLong {
                    count: total,
                    max: MAX_OID_LEN,
                },
            ));
        }

        let mut arcs = Vec::with_capacity(total);
        if prefix != 0 {
            arcs.extend_from_slice(&INTERNET);
            arcs.push(prefix as u32);
        }
        for _ in 0..n_subid {
            arcs.push(self.u32()?);
        }
        Ok((Oid::new(arcs), include))
    }

    /// Read an octet string and skip its padding.
    pub fn octet_string(&mut self) -> Result<Bytes> {
        let len = self.u32()? as usize;
        let data = Bytes::copy_from_slice(self.take(len)?);
        self.skip(padding(len))?;
        Ok(data)
    }

    /// Read a SearchRange.
    pub fn search_range(&mut self) -> Result<SearchRange> {
        let (start, include) = self.oid()?;
        let (end, _) = self.oid()?;
        Ok(SearchRange {
            start,
            include,
            end,
        })
    }

    /// Read SearchRanges until the payload ends.
    pub fn search_ranges(&mut self) -> Result<Vec<SearchRange>> {
        let mut ranges = Vec::new();
        while !self.is_empty() {
            ranges.push(self.search_range()?);
        }
        Ok(ranges)
    }

    /// Read a VarBind.
    pub fn varbind(&mut self) -> Result<VarBind> {
        let start = self.pos;
        let ty = self.u16()?;
        self.skip(2)?;
        let (oid, _) = self.oid()?;
        let value = match ty {
            wire_type::INTEGER => Value::Integer(self.u32()? as i32),
            wire_type::OCTET_STRING => Value::OctetString(self.octet_string()?),
            wire_type::NULL => Value::Null,
            wire_type::OBJECT_IDENTIFIER => Value::ObjectIdentifier(self.oid()?.0),
            wire_type::IP_ADDRESS => {
                let at = self.pos;
                let data = self.octet_string()?;
                let addr = <[u8; 4]>::try_from(&data[..]).map_err(|_| {
                    Error::decode(
                        at,
                        DecodeErrorKind::InvalidIpAddressLength { length: data.len() },
                    )
                })?;
                Value::IpAddress(addr)
            }
            wire_type::COUNTER32 => Value::Counter32(self.u32()?),
            wire_type::GAUGE32 => Value::Gauge32(self.u32()?),
            wire_type::TIMETICKS => Value::TimeTicks(self.u32()?),
            wire_type::OPAQUE => Value::Opaque(self.octet_string()?),
            wire_type::COUNTER64 => Value::Counter64(self.u64()?),
            wire_type::NO_SUCH_OBJECT => Value::NoSuchObject,
            wire_type::NO_SUCH_INSTANCE => Value::NoSuchInstance,
            wire_type::END_OF_MIB_VIEW => Value::EndOfMibView,
            other => {
                return Err(Error::decode(start, DecodeErrorKind::UnknownValueType(other)));
            }
        };
        Ok(VarBind { oid, value })
    }

    /// Read VarBinds until the payload ends.
    pub fn varbinds(&mut self) -> Result<Vec<VarBind>> {
        let mut varbinds = Vec::new();
        while !self.is_empty() {
            varbinds.push(self.varbind()?);
        }
        Ok(varbinds)
    }
}
