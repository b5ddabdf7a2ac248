//! Error types for async-agentx.
//!
//! All errors are `#[non_exhaustive]` to allow adding new variants without breaking changes.

use std::time::Duration;

use crate::oid::Oid;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Decode error kinds (BER and AgentX wire format).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Buffer ends before the item does; more bytes are required.
    Incomplete { needed: usize },
    /// Expected different tag.
    UnexpectedTag { expected: u8, actual: u8 },
    /// Invalid BER length encoding.
    InvalidLength,
    /// Indefinite length not supported.
    IndefiniteLength,
    /// Length field too long.
    LengthTooLong { octets: usize },
    /// Integer value overflow.
    IntegerOverflow,
    /// Zero-length integer.
    ZeroLengthInteger,
    /// Integer64 too long.
    Integer64TooLong { length: usize },
    /// Invalid OID encoding.
    InvalidOidEncoding,
    /// OID exceeds maximum arc count during decode.
    OidTooLong { count: usize, max: usize },
    /// NULL with non-zero length.
    InvalidNull,
    /// Invalid IP address length.
    InvalidIpAddressLength { length: usize },
    /// Unknown BER tag for a value.
    UnknownTag(u8),
    /// Unsupported AgentX protocol version.
    UnsupportedVersion(u8),
    /// Unknown AgentX PDU type.
    UnknownPduType(u8),
    /// Unknown AgentX VarBind type.
    UnknownValueType(u16),
    /// Payload parser consumed a different number of bytes than declared.
    PayloadLengthMismatch { declared: usize, consumed: usize },
    /// Payload length not a multiple of four.
    UnalignedPayload { length: usize },
    /// Declared payload length exceeds the configured maximum.
    PayloadTooLarge { length: usize, max: usize },
    /// Value did not have the type the caller asked for.
    TypeMismatch,
}

impl std::fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incomplete { needed } => write!(f, "need {} more bytes", needed),
            Self::UnexpectedTag { expected, actual } => {
                write!(f, "expected tag 0x{:02X}, got 0x{:02X}", expected, actual)
            }
            Self::InvalidLength => write!(f, "invalid length encoding"),
            Self::IndefiniteLength => write!(f, "indefinite length encoding not supported"),
            Self::LengthTooLong { octets } => {
                write!(f, "length encoding too long ({} octets)", octets)
            }
            Self::IntegerOverflow => write!(f, "integer overflow"),
            Self::ZeroLengthInteger => write!(f, "zero-length integer"),
            Self::Integer64TooLong { length } => {
                write!(f, "integer64 too long: {} bytes", length)
            }
            Self::InvalidOidEncoding => write!(f, "invalid OID encoding"),
            Self::OidTooLong { count, max } => {
                write!(f, "OID has {} arcs, exceeds maximum {}", count, max)
            }
            Self::InvalidNull => write!(f, "NULL with non-zero length"),
            Self::InvalidIpAddressLength { length } => {
                write!(f, "IP address must be 4 bytes, got {}", length)
            }
            Self::UnknownTag(t) => write!(f, "unknown value tag 0x{:02X}", t),
            Self::UnsupportedVersion(v) => write!(f, "unsupported AgentX version: {}", v),
            Self::UnknownPduType(t) => write!(f, "unknown PDU type: {}", t),
            Self::UnknownValueType(t) => write!(f, "unknown varbind type: {}", t),
            Self::PayloadLengthMismatch { declared, consumed } => {
                write!(
                    f,
                    "payload length {} does not match parsed length {}",
                    declared, consumed
                )
            }
            Self::UnalignedPayload { length } => {
                write!(f, "payload length {} is not a multiple of 4", length)
            }
            Self::PayloadTooLarge { length, max } => {
                write!(f, "payload length {} exceeds maximum {}", length, max)
            }
            Self::TypeMismatch => write!(f, "value type mismatch"),
        }
    }
}

/// OID validation error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OidErrorKind {
    /// Empty OID string.
    Empty,
    /// Invalid arc value.
    InvalidArc,
    /// OID has too many arcs (exceeds MAX_OID_LEN).
    TooManyArcs { count: usize, max: usize },
}

impl std::fmt::Display for OidErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty OID"),
            Self::InvalidArc => write!(f, "invalid arc value"),
            Self::TooManyArcs { count, max } => {
                write!(f, "OID has {} arcs, exceeds maximum {}", count, max)
            }
        }
    }
}

/// Table index error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexErrorKind {
    /// Number of index values differs from the table's index list.
    WrongArity { expected: usize, actual: usize },
    /// Index value does not match the declared index type.
    WrongType { position: usize },
    /// Fixed-length string index has the wrong length.
    WrongLength { position: usize, expected: usize, actual: usize },
    /// OID suffix cannot be decoded into the table's index values.
    MalformedSuffix,
    /// A row with this index already exists.
    DuplicateRow,
    /// No row with this index exists.
    NoSuchRow,
    /// Column number not part of the table's template.
    NoSuchColumn(u32),
    /// An IMPLIED index is only allowed as the last index.
    ImpliedNotLast,
    /// A table needs at least one index and one column.
    EmptyTable,
}

impl std::fmt::Display for IndexErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongArity { expected, actual } => {
                write!(f, "expected {} index values, got {}", expected, actual)
            }
            Self::WrongType { position } => {
                write!(f, "index value {} has the wrong type", position)
            }
            Self::WrongLength {
                position,
                expected,
                actual,
            } => write!(
                f,
                "index value {} must be {} octets, got {}",
                position, expected, actual
            ),
            Self::MalformedSuffix => write!(f, "malformed row index suffix"),
            Self::DuplicateRow => write!(f, "row already exists"),
            Self::NoSuchRow => write!(f, "no such row"),
            Self::NoSuchColumn(c) => write!(f, "no such column: {}", c),
            Self::ImpliedNotLast => write!(f, "IMPLIED index must be the last index"),
            Self::EmptyTable => write!(f, "table needs at least one index and one column"),
        }
    }
}

/// Protocol sequencing error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// Received a PDU type that is not valid at this point.
    UnexpectedPdu(u8),
    /// TestSet for a transaction that is already pending.
    DuplicateTransaction(u32),
    /// CommitSet for a transaction that was never tested.
    UnknownTransaction(u32),
    /// Response carried a packet ID nobody is waiting for.
    UnexpectedPacketId(u32),
}

impl std::fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedPdu(t) => write!(f, "unexpected PDU type {}", t),
            Self::DuplicateTransaction(id) => {
                write!(f, "transaction {} already has a pending set", id)
            }
            Self::UnknownTransaction(id) => write!(f, "no pending set for transaction {}", id),
            Self::UnexpectedPacketId(id) => write!(f, "unexpected packet ID {}", id),
        }
    }
}

/// AgentX error status codes (RFC 2741 §6.2.16, res.error).
///
/// Values 0-18 are the SNMP error statuses carried through unchanged;
/// 256 and above are AgentX administrative errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorStatus {
    NoError,
    TooBig,
    NoSuchName,
    BadValue,
    ReadOnly,
    GenErr,
    NoAccess,
    WrongType,
    WrongLength,
    WrongEncoding,
    WrongValue,
    NoCreation,
    InconsistentValue,
    ResourceUnavailable,
    CommitFailed,
    UndoFailed,
    AuthorizationError,
    NotWritable,
    InconsistentName,
    OpenFailed,
    NotOpen,
    IndexWrongType,
    IndexAlreadyAllocated,
    IndexNoneAvailable,
    IndexNotAllocated,
    UnsupportedContext,
    DuplicateRegistration,
    UnknownRegistration,
    UnknownAgentCaps,
    ParseError,
    RequestDenied,
    ProcessingError,
    /// Unknown/future error status code.
    Unknown(u16),
}

impl ErrorStatus {
    /// Create from raw status code.
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::NoError,
            1 => Self::TooBig,
            2 => Self::NoSuchName,
            3 => Self::BadValue,
            4 => Self::ReadOnly,
            5 => Self::GenErr,
            6 => Self::NoAccess,
            7 => Self::WrongType,
            8 => Self::WrongLength,
            9 => Self::WrongEncoding,
            10 => Self::WrongValue,
            11 => Self::NoCreation,
            12 => Self::InconsistentValue,
            13 => Self::ResourceUnavailable,
            14 => Self::CommitFailed,
            15 => Self::UndoFailed,
            16 => Self::AuthorizationError,
            17 => Self::NotWritable,
            18 => Self::InconsistentName,
            256 => Self::OpenFailed,
            257 => Self::NotOpen,
            258 => Self::IndexWrongType,
            259 => Self::IndexAlreadyAllocated,
            260 => Self::IndexNoneAvailable,
            261 => Self::IndexNotAllocated,
            262 => Self::UnsupportedContext,
            263 => Self::DuplicateRegistration,
            264 => Self::UnknownRegistration,
            265 => Self::UnknownAgentCaps,
            266 => Self::ParseError,
            267 => Self::RequestDenied,
            268 => Self::ProcessingError,
            other => Self::Unknown(other),
        }
    }

    /// Convert to raw status code.
    pub fn as_u16(&self) -> u16 {
        match self {
            Self::NoError => 0,
            Self::TooBig => 1,
            Self::NoSuchName => 2,
            Self::BadValue => 3,
            Self::ReadOnly => 4,
            Self::GenErr => 5,
            Self::NoAccess => 6,
            Self::WrongType => 7,
            Self::WrongLength => 8,
            Self::WrongEncoding => 9,
            Self::WrongValue => 10,
            Self::NoCreation => 11,
            Self::InconsistentValue => 12,
            Self::ResourceUnavailable => 13,
            Self::CommitFailed => 14,
            Self::UndoFailed => 15,
            Self::AuthorizationError => 16,
            Self::NotWritable => 17,
            Self::InconsistentName => 18,
            Self::OpenFailed => 256,
            Self::NotOpen => 257,
            Self::IndexWrongType => 258,
            Self::IndexAlreadyAllocated => 259,
            Self::IndexNoneAvailable => 260,
            Self::IndexNotAllocated => 261,
            Self::UnsupportedContext => 262,
            Self::DuplicateRegistration => 263,
            Self::UnknownRegistration => 264,
            Self::UnknownAgentCaps => 265,
            Self::ParseError => 266,
            Self::RequestDenied => 267,
            Self::ProcessingError => 268,
            Self::Unknown(code) => *code,
        }
    }

    /// Returns `true` for `NoError`.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::NoError)
    }
}

impl std::fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoError => write!(f, "noAgentXError"),
            Self::TooBig => write!(f, "tooBig"),
            Self::NoSuchName => write!(f, "noSuchName"),
            Self::BadValue => write!(f, "badValue"),
            Self::ReadOnly => write!(f, "readOnly"),
            Self::GenErr => write!(f, "genErr"),
            Self::NoAccess => write!(f, "noAccess"),
            Self::WrongType => write!(f, "wrongType"),
            Self::WrongLength => write!(f, "wrongLength"),
            Self::WrongEncoding => write!(f, "wrongEncoding"),
            Self::WrongValue => write!(f, "wrongValue"),
            Self::NoCreation => write!(f, "noCreation"),
            Self::InconsistentValue => write!(f, "inconsistentValue"),
            Self::ResourceUnavailable => write!(f, "resourceUnavailable"),
            Self::CommitFailed => write!(f, "commitFailed"),
            Self::UndoFailed => write!(f, "undoFailed"),
            Self::AuthorizationError => write!(f, "authorizationError"),
            Self::NotWritable => write!(f, "notWritable"),
            Self::InconsistentName => write!(f, "inconsistentName"),
            Self::OpenFailed => write!(f, "openFailed"),
            Self::NotOpen => write!(f, "notOpen"),
            Self::IndexWrongType => write!(f, "indexWrongType"),
            Self::IndexAlreadyAllocated => write!(f, "indexAlreadyAllocated"),
            Self::IndexNoneAvailable => write!(f, "indexNoneAvailable"),
            Self::IndexNotAllocated => write!(f, "indexNotAllocated"),
            Self::UnsupportedContext => write!(f, "unsupportedContext"),
            Self::DuplicateRegistration => write!(f, "duplicateRegistration"),
            Self::UnknownRegistration => write!(f, "unknownRegistration"),
            Self::UnknownAgentCaps => write!(f, "unknownAgentCaps"),
            Self::ParseError => write!(f, "parseError"),
            Self::RequestDenied => write!(f, "requestDenied"),
            Self::ProcessingError => write!(f, "processingError"),
            Self::Unknown(code) => write!(f, "unknown({})", code),
        }
    }
}

/// Library error type.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// I/O error on the connection to the master agent.
    #[error("I/O error{}: {source}", target.as_ref().map(|t| format!(" communicating with {}", t)).unwrap_or_default())]
    Io {
        target: Option<Box<str>>,
        #[source]
        source: std::io::Error,
    },

    /// Locally-originated request got no response in time.
    #[error("timeout after {elapsed:?} (packet_id={packet_id})")]
    Timeout { elapsed: Duration, packet_id: u32 },

    /// Master agent refused the Open PDU.
    #[error("master agent refused session: {status}")]
    OpenFailed { status: ErrorStatus },

    /// Master agent refused a Register or Unregister PDU.
    #[error("registration of {oid} rejected: {status}")]
    Registration { oid: Oid, status: ErrorStatus },

    /// Master agent returned an error for some other request.
    #[error("master agent returned {status}")]
    Master { status: ErrorStatus },

    /// Registration overlaps an existing registry entry.
    #[error("registration of {oid} overlaps existing entry {existing}")]
    Overlap { oid: Oid, existing: Oid },

    /// No registry entry for this OID.
    #[error("no registered object at {oid}")]
    NotFound { oid: Oid },

    /// Value rejected by a binding (type, constraint or validator).
    #[error("value rejected{}: {status}", oid.as_ref().map(|o| format!(" for {}", o)).unwrap_or_default())]
    Value {
        oid: Option<Oid>,
        status: ErrorStatus,
    },

    /// Table index error.
    #[error("table index error: {kind}")]
    Index { kind: IndexErrorKind },

    /// Operation needs an open session.
    #[error("session not open")]
    NotOpen,

    /// `connect` called on a session that is not disconnected.
    #[error("session already connected")]
    AlreadyOpen,

    /// Session was closed while the operation was in flight.
    #[error("session closed")]
    Closed,

    /// Invalid OID format.
    #[error("invalid OID: {kind}")]
    InvalidOid {
        kind: OidErrorKind,
        input: Option<Box<str>>,
    },

    /// Invalid master agent address.
    #[error("invalid master address: {input}")]
    InvalidAddress { input: Box<str> },

    /// Decoding error (BER or AgentX wire format).
    #[error("decode error at offset {offset}: {kind}")]
    Decode {
        offset: usize,
        kind: DecodeErrorKind,
    },

    /// Protocol sequencing error.
    #[error("protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },
}

impl Error {
    /// Create a decode error.
    pub fn decode(offset: usize, kind: DecodeErrorKind) -> Self {
        Self::Decode { offset, kind }
    }

    /// Create an "incomplete data" decode error.
    pub fn incomplete(offset: usize, needed: usize) -> Self {
        Self::Decode {
            offset,
            kind: DecodeErrorKind::Incomplete { needed },
        }
    }

    /// Create an invalid OID error from a kind (no input string).
    pub fn invalid_oid(kind: OidErrorKind) -> Self {
        Self::InvalidOid { kind, input: None }
    }

    /// Create an invalid OID error with the input string that failed.
    pub fn invalid_oid_with_input(kind: OidErrorKind, input: impl Into<Box<str>>) -> Self {
        Self::InvalidOid {
            kind,
            input: Some(input.into()),
        }
    }

    /// Create an I/O error without target information.
    pub fn io(source: std::io::Error) -> Self {
        Self::Io {
            target: None,
            source,
        }
    }

    /// Create a table index error.
    pub fn index(kind: IndexErrorKind) -> Self {
        Self::Index { kind }
    }

    /// Create a protocol error.
    pub fn protocol(kind: ProtocolErrorKind) -> Self {
        Self::Protocol { kind }
    }

    /// Returns `true` if decoding stopped because the buffer was too short.
    ///
    /// Stream readers use this to wait for more bytes instead of failing.
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            Self::Decode {
                kind: DecodeErrorKind::Incomplete { .. },
                ..
            }
        )
    }

    /// Returns `true` if this error ends the session (transport-level failure).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Closed)
    }

    /// The AgentX status this error maps to when reported to the master.
    pub fn status(&self) -> ErrorStatus {
        match self {
            Self::OpenFailed { status }
            | Self::Registration { status, .. }
            | Self::Master { status }
            | Self::Value { status, .. } => *status,
            Self::Decode { .. } => ErrorStatus::ParseError,
            Self::Protocol { .. } => ErrorStatus::ProcessingError,
            Self::NotOpen => ErrorStatus::NotOpen,
            Self::Index { .. } | Self::NotFound { .. } => ErrorStatus::NoCreation,
            _ => ErrorStatus::GenErr,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_roundtrip_codes() {
        for code in (0u16..=18).chain(256..=268) {
            assert_eq!(ErrorStatus::from_u16(code).as_u16(), code);
        }
        assert_eq!(ErrorStatus::from_u16(999), ErrorStatus::Unknown(999));
    }

    #[test]
    fn test_error_status_display() {
        assert_eq!(ErrorStatus::NoError.to_string(), "noAgentXError");
        assert_eq!(ErrorStatus::NotWritable.to_string(), "notWritable");
        assert_eq!(
            ErrorStatus::DuplicateRegistration.to_string(),
            "duplicateRegistration"
        );
    }

    #[test]
    fn test_incomplete_is_distinguishable() {
        let err = Error::incomplete(4, 8);
        assert!(err.is_incomplete());
        assert!(!err.is_fatal());

        let err = Error::decode(0, DecodeErrorKind::InvalidLength);
        assert!(!err.is_incomplete());
        assert_eq!(err.status(), ErrorStatus::ParseError);
    }

    #[test]
    fn test_io_is_fatal() {
        let err = Error::io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("reset"));
    }
}
