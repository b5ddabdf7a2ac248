//! AgentX PDUs (RFC 2741 §6).
//!
//! [`Pdu`] is a closed enum over every PDU type a subagent sends or
//! receives. [`encode`] always emits network byte order; [`decode`] honors
//! the NETWORK_BYTE_ORDER flag of the incoming header.

mod codec;
mod header;
pub mod wire;

pub use codec::{AgentXCodec, Frame};
pub use header::{AGENTX_VERSION, ByteOrder, Flags, HEADER_SIZE, Header, PduType};
pub use wire::SearchRange;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{DecodeErrorKind, Error, ErrorStatus, Result};
use crate::oid::Oid;
use crate::varbind::VarBind;

/// Largest payload accepted by default.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Default registration priority (RFC 2741 §6.2.3).
pub const DEFAULT_PRIORITY: u8 = 127;

/// Reason code carried in a Close PDU (RFC 2741 §6.2.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    Other,
    ParseError,
    ProtocolError,
    Timeouts,
    Shutdown,
    ByManager,
    Unknown(u8),
}

impl CloseReason {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Other,
            2 => Self::ParseError,
            3 => Self::ProtocolError,
            4 => Self::Timeouts,
            5 => Self::Shutdown,
            6 => Self::ByManager,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Other => 1,
            Self::ParseError => 2,
            Self::ProtocolError => 3,
            Self::Timeouts => 4,
            Self::Shutdown => 5,
            Self::ByManager => 6,
            Self::Unknown(code) => code,
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other => write!(f, "reasonOther"),
            Self::ParseError => write!(f, "reasonParseError"),
            Self::ProtocolError => write!(f, "reasonProtocolError"),
            Self::Timeouts => write!(f, "reasonTimeouts"),
            Self::Shutdown => write!(f, "reasonShutdown"),
            Self::ByManager => write!(f, "reasonByManager"),
            Self::Unknown(code) => write!(f, "reason({})", code),
        }
    }
}

/// An AgentX PDU payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Pdu {
    Open {
        /// Default timeout for this session, in seconds (0 = master default).
        timeout: u8,
        id: Oid,
        description: Bytes,
    },
    Close {
        reason: CloseReason,
    },
    Register {
        context: Option<Bytes>,
        timeout: u8,
        priority: u8,
        subtree: Oid,
        /// Position (1-based) of the sub-identifier that ranges up to
        /// `upper_bound`; 0 for no range.
        range_subid: u8,
        upper_bound: Option<u32>,
    },
    Unregister {
        context: Option<Bytes>,
        priority: u8,
        subtree: Oid,
        range_subid: u8,
        upper_bound: Option<u32>,
    },
    Get {
        context: Option<Bytes>,
        ranges: Vec<SearchRange>,
    },
    GetNext {
        context: Option<Bytes>,
        ranges: Vec<SearchRange>,
    },
    GetBulk {
        context: Option<Bytes>,
        non_repeaters: u16,
        max_repetitions: u16,
        ranges: Vec<SearchRange>,
    },
    TestSet {
        context: Option<Bytes>,
        varbinds: Vec<VarBind>,
    },
    CommitSet,
    UndoSet,
    CleanupSet,
    Notify {
        context: Option<Bytes>,
        varbinds: Vec<VarBind>,
    },
    Ping {
        context: Option<Bytes>,
    },
    AddAgentCaps {
        context: Option<Bytes>,
        id: Oid,
        description: Bytes,
    },
    RemoveAgentCaps {
        context: Option<Bytes>,
        id: Oid,
    },
    Response {
        /// sysUpTime of the responder, in centiseconds.
        sys_uptime: u32,
        error: ErrorStatus,
        /// 1-based index of the failing varbind, 0 when none.
        index: u16,
        varbinds: Vec<VarBind>,
    },
}

impl Pdu {
    /// The type code of this PDU.
    pub fn pdu_type(&self) -> PduType {
        match self {
            Pdu::Open { .. } => PduType::Open,
            Pdu::Close { .. } => PduType::Close,
            Pdu::Register { .. } => PduType::Register,
            Pdu::Unregister { .. } => PduType::Unregister,
            Pdu::Get { .. } => PduType::Get,
            Pdu::GetNext { .. } => PduType::GetNext,
            Pdu::GetBulk { .. } => PduType::GetBulk,
            Pdu::TestSet { .. } => PduType::TestSet,
            Pdu::CommitSet => PduType::CommitSet,
            Pdu::UndoSet => PduType::UndoSet,
            Pdu::CleanupSet => PduType::CleanupSet,
            Pdu::Notify { .. } => PduType::Notify,
            Pdu::Ping { .. } => PduType::Ping,
            Pdu::AddAgentCaps { .. } => PduType::AddAgentCaps,
            Pdu::RemoveAgentCaps { .. } => PduType::RemoveAgentCaps,
            Pdu::Response { .. } => PduType::Response,
        }
    }

    /// The non-default context, if any.
    pub fn context(&self) -> Option<&Bytes> {
        match self {
            Pdu::Register { context, .. }
            | Pdu::Unregister { context, .. }
            | Pdu::Get { context, .. }
            | Pdu::GetNext { context, .. }
            | Pdu::GetBulk { context, .. }
            | Pdu::TestSet { context, .. }
            | Pdu::Notify { context, .. }
            | Pdu::Ping { context }
            | Pdu::AddAgentCaps { context, .. }
            | Pdu::RemoveAgentCaps { context, .. } => context.as_ref(),
            Pdu::Open { .. }
            | Pdu::Close { .. }
            | Pdu::CommitSet
            | Pdu::UndoSet
            | Pdu::CleanupSet
            | Pdu::Response { .. } => None,
        }
    }

    /// Build a Response with no error.
    pub fn response(sys_uptime: u32, varbinds: Vec<VarBind>) -> Self {
        Pdu::Response {
            sys_uptime,
            error: ErrorStatus::NoError,
            index: 0,
            varbinds,
        }
    }

    /// Build an error Response.
    pub fn error_response(
        sys_uptime: u32,
        error: ErrorStatus,
        index: u16,
        varbinds: Vec<VarBind>,
    ) -> Self {
        Pdu::Response {
            sys_uptime,
            error,
            index,
            varbinds,
        }
    }

    fn encode_payload(&self, buf: &mut BytesMut) -> Result<()> {
        if let Some(context) = self.context() {
            wire::put_octet_string(buf, context);
        }
        match self {
            Pdu::Open {
                timeout,
                id,
                description,
            } => {
                buf.put_u8(*timeout);
                buf.put_bytes(0, 3);
                wire::put_oid(buf, id, false)?;
                wire::put_octet_string(buf, description);
            }
            Pdu::Close { reason } => {
                buf.put_u8(reason.as_u8());
                buf.put_bytes(0, 3);
            }
            Pdu::Register {
                timeout,
                priority,
                subtree,
                range_subid,
                upper_bound,
                ..
            } => {
                buf.put_u8(*timeout);
                buf.put_u8(*priority);
                buf.put_u8(*range_subid);
                buf.put_u8(0);
                wire::put_oid(buf, subtree, false)?;
                if *range_subid != 0 {
                    buf.put_u32(upper_bound.unwrap_or(0));
                }
            }
            Pdu::Unregister {
                priority,
                subtree,
                range_subid,
                upper_bound,
                ..
            } => {
                buf.put_u8(0);
                buf.put_u8(*priority);
                buf.put_u8(*range_subid);
                buf.put_u8(0);
                wire::put_oid(buf, subtree, false)?;
                if *range_subid != 0 {
                    buf.put_u32(upper_bound.unwrap_or(0));
                }
            }
            Pdu::Get { ranges, .. } | Pdu::GetNext { ranges, .. } => {
                for range in ranges {
                    wire::put_search_range(buf, range)?;
                }
            }
            Pdu::GetBulk {
                non_repeaters,
                max_repetitions,
                ranges,
                ..
            } => {
                buf.put_u16(*non_repeaters);
                buf.put_u16(*max_repetitions);
                for range in ranges {
                    wire::put_search_range(buf, range)?;
                }
            }
            Pdu::TestSet { varbinds, .. } | Pdu::Notify { varbinds, .. } => {
                wire::put_varbinds(buf, varbinds)?;
            }
            Pdu::CommitSet | Pdu::UndoSet | Pdu::CleanupSet | Pdu::Ping { .. } => {}
            Pdu::AddAgentCaps {
                id, description, ..
            } => {
                wire::put_oid(buf, id, false)?;
                wire::put_octet_string(buf, description);
            }
            Pdu::RemoveAgentCaps { id, .. } => wire::put_oid(buf, id, false)?,
            Pdu::Response {
                sys_uptime,
                error,
                index,
                varbinds,
            } => {
                buf.put_u32(*sys_uptime);
                buf.put_u16(error.as_u16());
                buf.put_u16(*index);
                wire::put_varbinds(buf, varbinds)?;
            }
        }
        Ok(())
    }

    /// Parse a payload under an already-decoded header.
    ///
    /// `payload` must be exactly `header.payload_length` bytes.
    pub fn decode_payload(header: &Header, payload: &[u8]) -> Result<Self> {
        let mut r = wire::Reader::new(payload, header.byte_order());
        let pdu = Self::read_payload(header, &mut r).map_err(|e| match e {
            // Running off the end of a complete payload is a framing error
            Error::Decode {
                kind: DecodeErrorKind::Incomplete { needed },
                ..
            } => Error::decode(
                HEADER_SIZE + payload.len(),
                DecodeErrorKind::PayloadLengthMismatch {
                    declared: payload.len(),
                    consumed: payload.len() + needed,
                },
            ),
            Error::Decode { offset, kind } => Error::decode(HEADER_SIZE + offset, kind),
            other => other,
        })?;
        if r.position() != payload.len() {
            return Err(Error::decode(
                HEADER_SIZE + r.position(),
                DecodeErrorKind::PayloadLengthMismatch {
                    declared: payload.len(),
                    consumed: r.position(),
                },
            ));
        }
        Ok(pdu)
    }

    fn read_payload(header: &Header, r: &mut wire::Reader<'_>) -> Result<Self> {
        let context = if header.pdu_type.allows_context()
            && header.flags.contains(Flags::NON_DEFAULT_CONTEXT)
        {
            Some(r.octet_string()?)
        } else {
            None
        };

        Ok(match header.pdu_type {
            PduType::Open => {
                let timeout = r.u8()?;
                r.skip(3)?;
                let (id, _) = r.oid()?;
                let description = r.octet_string()?;
                Pdu::Open {
                    timeout,
                    id,
                    description,
                }
            }
            PduType::Close => {
                let reason = CloseReason::from_u8(r.u8()?);
                r.skip(3)?;
                Pdu::Close { reason }
            }
            PduType::Register => {
                let timeout = r.u8()?;
                let priority = r.u8()?;
                let range_subid = r.u8()?;
                r.skip(1)?;
                let (subtree, _) = r.oid()?;
                let upper_bound = if range_subid != 0 { Some(r.u32()?) } else { None };
                Pdu::Register {
                    context,
                    timeout,
                    priority,
                    subtree,
                    range_subid,
                    upper_bound,
                }
            }
            PduType::Unregister => {
                r.skip(1)?;
                let priority = r.u8()?;
                let range_subid = r.u8()?;
                r.skip(1)?;
                let (subtree, _) = r.oid()?;
                let upper_bound = if range_subid != 0 { Some(r.u32()?) } else { None };
                Pdu::Unregister {
                    context,
                    priority,
                    subtree,
                    range_subid,
                    upper_bound,
                }
            }
            PduType::Get => Pdu::Get {
                context,
                ranges: r.search_ranges()?,
            },
            PduType::GetNext => Pdu::GetNext {
                context,
                ranges: r.search_ranges()?,
            },
            PduType::GetBulk => {
                let non_repeaters = r.u16()?;
                let max_repetitions = r.u16()?;
                Pdu::GetBulk {
                    context,
                    non_repeaters,
                    max_repetitions,
                    ranges: r.search_ranges()?,
                }
            }
            PduType::TestSet => Pdu::TestSet {
                context,
                varbinds: r.varbinds()?,
            },
            PduType::CommitSet => Pdu::CommitSet,
            PduType::UndoSet => Pdu::UndoSet,
            PduType::CleanupSet => Pdu::CleanupSet,
            PduType::Notify => Pdu::Notify {
                context,
                varbinds: r.varbinds()?,
            },
            PduType::Ping => Pdu::Ping { context },
            PduType::AddAgentCaps => {
                let (id, _) = r.oid()?;
                let description = r.octet_string()?;
                Pdu::AddAgentCaps {
                    context,
                    id,
                    description,
                }
            }
            PduType::RemoveAgentCaps => {
                let (id, _) = r.oid()?;
                Pdu::RemoveAgentCaps { context, id }
            }
            PduType::Response => {
                let sys_uptime = r.u32()?;
                let error = ErrorStatus::from_u16(r.u16()?);
                let index = r.u16()?;
                Pdu::Response {
                    sys_uptime,
                    error,
                    index,
                    varbinds: r.varbinds()?,
                }
            }
        })
    }
}

/// Encode a PDU into `buf`.
///
/// The header's type, payload length and the NETWORK_BYTE_ORDER and
/// NON_DEFAULT_CONTEXT flags are derived from `pdu`; the remaining header
/// fields are taken from `header`.
///
/// On error (an OID longer than [`MAX_OID_LEN`](crate::oid::MAX_OID_LEN))
/// `buf` is left as it was.
pub fn encode_into(header: &Header, pdu: &Pdu, buf: &mut BytesMut) -> Result<()> {
    let start = buf.len();
    buf.reserve(HEADER_SIZE + 64);
    buf.put_bytes(0, HEADER_SIZE);
    if let Err(e) = pdu.encode_payload(buf) {
        buf.truncate(start);
        return Err(e);
    }
    let payload_length = (buf.len() - start - HEADER_SIZE) as u32;

    let mut header = header.clone();
    header.pdu_type = pdu.pdu_type();
    header.payload_length = payload_length;
    if pdu.context().is_some() {
        header.flags.insert(Flags::NON_DEFAULT_CONTEXT);
    } else {
        header.flags.remove(Flags::NON_DEFAULT_CONTEXT);
    }
    let mut slot = &mut buf[start..start + HEADER_SIZE];
    header.encode(&mut slot);
    Ok(())
}

/// Encode a PDU to bytes.
pub fn encode(header: &Header, pdu: &Pdu) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    encode_into(header, pdu, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode one PDU from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete PDU, otherwise
/// the header, the PDU and the number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<Option<(Header, Pdu, usize)>> {
    let Some(header) = Header::decode(buf, DEFAULT_MAX_PAYLOAD)? else {
        return Ok(None);
    };
    let total = HEADER_SIZE + header.payload_length as usize;
    if buf.len() < total {
        return Ok(None);
    }
    let pdu = Pdu::decode_payload(&header, &buf[HEADER_SIZE..total])?;
    Ok(Some((header, pdu, total)))
}
