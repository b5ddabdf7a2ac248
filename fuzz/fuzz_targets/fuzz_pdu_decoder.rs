#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

use async_agentx::pdu::{AgentXCodec, Frame, Header, Pdu, encode};

fuzz_target!(|data: &[u8]| {
    // stream framing: drain every frame the codec accepts
    let mut codec = AgentXCodec::with_max_payload(64 * 1024);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        // whatever decodes must re-encode and decode to the same PDU
        if let Frame::Pdu(header, pdu) = frame {
            let bytes = encode(&header, &pdu).expect("decoded PDU re-encodes");
            let again = Header::decode(&bytes, usize::MAX)
                .expect("re-encoded header")
                .expect("complete header");
            let payload = &bytes[async_agentx::pdu::HEADER_SIZE..];
            assert_eq!(Pdu::decode_payload(&again, payload).ok(), Some(pdu));
        }
    }
});
