//! AgentX PDU header (RFC 2741 §6.1).

use bytes::BufMut;

use crate::error::{DecodeErrorKind, Error, Result};

/// AgentX protocol version.
pub const AGENTX_VERSION: u8 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 20;

/// PDU type codes (RFC 2741 §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PduType {
    Open = 1,
    Close = 2,
    Register = 3,
    Unregister = 4,
    Get = 5,
    GetNext = 6,
    GetBulk = 7,
    TestSet = 8,
    CommitSet = 9,
    UndoSet = 10,
    CleanupSet = 11,
    Notify = 12,
    Ping = 13,
    AddAgentCaps = 16,
    RemoveAgentCaps = 17,
    Response = 18,
}

impl PduType {
    /// Parse a type code.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Open,
            2 => Self::Close,
            3 => Self::Register,
            4 => Self::Unregister,
            5 => Self::Get,
            6 => Self::GetNext,
            7 => Self::GetBulk,
            8 => Self::TestSet,
            9 => Self::CommitSet,
            10 => Self::UndoSet,
            11 => Self::CleanupSet,
            12 => Self::Notify,
            13 => Self::Ping,
            16 => Self::AddAgentCaps,
            17 => Self::RemoveAgentCaps,
            18 => Self::Response,
            _ => return None,
        })
    }

    /// Raw type code.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns `true` if PDUs of this type may carry a non-default context.
    pub fn allows_context(self) -> bool {
        !matches!(
            self,
            Self::Open
                | Self::Close
                | Self::CommitSet
                | Self::UndoSet
                | Self::CleanupSet
                | Self::Response
        )
    }
}

impl std::fmt::Display for PduType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Open => "Open",
            Self::Close => "Close",
            Self::Register => "Register",
            Self::Unregister => "Unregister",
            Self::Get => "Get",
            Self::GetNext => "GetNext",
            Self::GetBulk => "GetBulk",
            Self::TestSet => "TestSet",
            Self::CommitSet => "CommitSet",
            Self::UndoSet => "UndoSet",
            Self::CleanupSet => "CleanupSet",
            Self::Notify => "Notify",
            Self::Ping => "Ping",
            Self::AddAgentCaps => "AddAgentCaps",
            Self::RemoveAgentCaps => "RemoveAgentCaps",
            Self::Response => "Response",
        };
        f.write_str(name)
    }
}

/// Header flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u8);

impl Flags {
    pub const INSTANCE_REGISTRATION: Flags = Flags(0x01);
    pub const NEW_INDEX: Flags = Flags(0x02);
    pub const ANY_INDEX: Flags = Flags(0x04);
    pub const NON_DEFAULT_CONTEXT: Flags = Flags(0x08);
    pub const NETWORK_BYTE_ORDER: Flags = Flags(0x10);

    /// No flags set.
    pub const fn empty() -> Self {
        Flags(0)
    }

    /// Build from raw bits. Unknown bits are kept.
    pub const fn from_bits(bits: u8) -> Self {
        Flags(bits)
    }

    /// Raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` if every bit of `other` is set.
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// Byte order of the multi-byte fields in one PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    /// Byte order selected by the NETWORK_BYTE_ORDER flag.
    pub fn from_flags(flags: Flags) -> Self {
        if flags.contains(Flags::NETWORK_BYTE_ORDER) {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    pub(crate) fn u16(self, b: [u8; 2]) -> u16 {
        match self {
            ByteOrder::Big => u16::from_be_bytes(b),
            ByteOrder::Little => u16::from_le_bytes(b),
        }
    }

    pub(crate) fn u32(self, b: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Big => u32::from_be_bytes(b),
            ByteOrder::Little => u32::from_le_bytes(b),
        }
    }

    pub(crate) fn u64(self, b: [u8; 8]) -> u64 {
        match self {
            ByteOrder::Big => u64::from_be_bytes(b),
            ByteOrder::Little => u64::from_le_bytes(b),
        }
    }
}

/// AgentX PDU header.
///
/// Multi-byte fields hold host values; the wire byte order is recorded in
/// `flags` and normalized on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub pdu_type: PduType,
    pub flags: Flags,
    pub session_id: u32,
    pub transaction_id: u32,
    pub packet_id: u32,
    pub payload_length: u32,
}

impl Header {
    /// Create a header for an outgoing PDU. The payload length is filled in
    /// by the encoder.
    pub fn new(pdu_type: PduType, session_id: u32, transaction_id: u32, packet_id: u32) -> Self {
        Self {
            version: AGENTX_VERSION,
            pdu_type,
            flags: Flags::NETWORK_BYTE_ORDER,
            session_id,
            transaction_id,
            packet_id,
            payload_length: 0,
        }
    }

    /// Header for the Response to this PDU.
    pub fn response(&self) -> Self {
        Self::new(
            PduType::Response,
            self.session_id,
            self.transaction_id,
            self.packet_id,
        )
    }

    /// Byte order of this PDU's multi-byte fields.
    pub fn byte_order(&self) -> ByteOrder {
        ByteOrder::from_flags(self.flags)
    }

    /// Write the header in network byte order.
    pub fn encode(&self, buf: &mut impl BufMut) {
        let mut flags = self.flags;
        flags.insert(Flags::NETWORK_BYTE_ORDER);
        buf.put_u8(self.version);
        buf.put_u8(self.pdu_type.as_u8());
        buf.put_u8(flags.bits());
        buf.put_u8(0);
        buf.put_u32(self.session_id);
        buf.put_u32(self.transaction_id);
        buf.put_u32(self.packet_id);
        buf.put_u32(self.payload_length);
    }

    /// Parse a header from the front of `buf`.
    ///
    /// Returns `Ok(None)` when fewer than [`HEADER_SIZE`] bytes are
    /// available. Fails on a wrong version, an unknown PDU type, a payload
    /// length that is not a multiple of four or exceeds `max_payload`.
    pub fn decode(buf: &[u8], max_payload: usize) -> Result<Option<Self>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        if buf[0] != AGENTX_VERSION {
            return Err(Error::decode(0, DecodeErrorKind::UnsupportedVersion(buf[0])));
        }
        let pdu_type = PduType::from_u8(buf[1])
            .ok_or_else(|| Error::decode(1, DecodeErrorKind::UnknownPduType(buf[1])))?;
        let flags = Flags::from_bits(buf[2]);
        let order = ByteOrder::from_flags(flags);
        let word = |at: usize| order.u32([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);

        let payload_length = word(16);
        let length = payload_length as usize;
        if length % 4 != 0 {
            return Err(Error::decode(16, DecodeErrorKind::UnalignedPayload { length }));
        }
        if length > max_payload {
            return Err(Error::decode(
                16,
                DecodeErrorKind::PayloadTooLarge {
                    length,
                    max: max_payload,
                },
            ));
        }

        Ok(Some(Self {
            version: buf[0],
            pdu_type,
            flags,
            session_id: word(4),
            transaction_id: word(8),
            packet_id: word(12),
            payload_length,
        }))
    }
}
