//! Stream framing for AgentX PDUs.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{DEFAULT_MAX_PAYLOAD, HEADER_SIZE, Header, Pdu, encode_into};
use crate::error::Error;

/// One decoded frame.
#[derive(Debug)]
pub enum Frame {
    /// A well-formed PDU.
    Pdu(Header, Pdu),
    /// A trustworthy header whose payload failed to parse. The frame has
    /// been consumed; the peer should get a `parseError` Response.
    Malformed { header: Header, error: Error },
}

/// `tokio_util` codec for AgentX.
///
/// Header errors (unsupported version, unknown PDU type, bad payload
/// length) leave the stream position unknown and are returned as errors.
/// Payload errors are yielded as [`Frame::Malformed`].
#[derive(Debug, Clone)]
pub struct AgentXCodec {
    max_payload: usize,
}

impl AgentXCodec {
    pub fn new() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Limit the accepted payload size.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for AgentXCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AgentXCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        let Some(header) = Header::decode(src, self.max_payload)? else {
            src.reserve(HEADER_SIZE);
            return Ok(None);
        };
        let total = HEADER_SIZE + header.payload_length as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let result = Pdu::decode_payload(&header, &src[HEADER_SIZE..total]);
        src.advance(total);
        Ok(Some(match result {
            Ok(pdu) => Frame::Pdu(header, pdu),
            Err(error) => Frame::Malformed { header, error },
        }))
    }
}

impl<'a> Encoder<(&'a Header, &'a Pdu)> for AgentXCodec {
    type Error = Error;

    fn encode(
        &mut self,
        (header, pdu): (&'a Header, &'a Pdu),
        dst: &mut BytesMut,
    ) -> Result<(), Error> {
        encode_into(header, pdu, dst)
    }
}
