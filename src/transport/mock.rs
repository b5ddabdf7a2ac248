//! In-memory master agent for tests.
//!
//! [`mock_master`] returns a [`MockConnector`] to hand to the session and a
//! [`MockListener`] that yields one [`MockMaster`] per connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder};

use super::{BoxFuture, BoxedStream, Connector};
use crate::error::{Error, ErrorStatus, Result};
use crate::pdu::{AgentXCodec, Frame, Header, Pdu, PduType};
use crate::varbind::VarBind;

const MOCK_BUFFER: usize = 64 * 1024;

/// Create a connected connector/listener pair.
pub fn mock_master() -> (MockConnector, MockListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MockConnector {
            tx,
            refuse: Arc::new(AtomicBool::new(false)),
        },
        MockListener { rx },
    )
}

/// Connector side of the mock.
#[derive(Clone)]
pub struct MockConnector {
    tx: mpsc::UnboundedSender<DuplexStream>,
    refuse: Arc<AtomicBool>,
}

impl MockConnector {
    /// Make subsequent connects fail with `ConnectionRefused`.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Connector for MockConnector {
    fn connect(&self) -> BoxFuture<'_, Result<BoxedStream>> {
        Box::pin(async move {
            let refused = || {
                Error::io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "mock master not listening",
                ))
            };
            if self.refuse.load(Ordering::SeqCst) {
                return Err(refused());
            }
            let (client, server) = tokio::io::duplex(MOCK_BUFFER);
            self.tx.send(server).map_err(|_| refused())?;
            Ok(Box::new(client) as BoxedStream)
        })
    }

    fn target(&self) -> String {
        "mock".to_string()
    }
}

/// Accepts connections made through a [`MockConnector`].
pub struct MockListener {
    rx: mpsc::UnboundedReceiver<DuplexStream>,
}

impl MockListener {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<MockMaster> {
        self.rx.recv().await.map(MockMaster::new)
    }
}

/// Master side of one mock connection.
pub struct MockMaster {
    stream: DuplexStream,
    buf: BytesMut,
    codec: AgentXCodec,
    next_packet_id: u32,
}

impl MockMaster {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
            codec: AgentXCodec::new(),
            next_packet_id: 1000,
        }
    }

    /// Receive the next PDU. Returns `None` when the subagent closed the
    /// stream.
    pub async fn recv(&mut self) -> Option<(Header, Pdu)> {
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(Frame::Pdu(header, pdu))) => return Some((header, pdu)),
                Ok(Some(Frame::Malformed { error, .. })) => {
                    panic!("subagent sent malformed PDU: {error}")
                }
                Ok(None) => {}
                Err(e) => panic!("subagent sent undecodable bytes: {e}"),
            }
            match self.stream.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    /// Send a PDU.
    pub async fn send(&mut self, header: &Header, pdu: &Pdu) {
        let mut out = BytesMut::new();
        self.codec
            .encode((header, pdu), &mut out)
            .expect("mock master PDUs encode");
        self.send_raw(&out).await;
    }

    /// Send raw bytes.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let _ = self.stream.write_all(bytes).await;
    }

    /// Answer a PDU from the subagent.
    pub async fn respond(
        &mut self,
        to: &Header,
        error: ErrorStatus,
        index: u16,
        varbinds: Vec<VarBind>,
    ) {
        let pdu = Pdu::error_response(0, error, index, varbinds);
        self.send(&to.response(), &pdu).await;
    }

    /// Receive the Open PDU and accept it with `session_id`.
    pub async fn accept_open(&mut self, session_id: u32) -> Pdu {
        let (header, pdu) = self.recv().await.expect("subagent sent no Open");
        assert_eq!(header.pdu_type, PduType::Open);
        let mut reply = header.response();
        reply.session_id = session_id;
        self.send(&reply, &Pdu::response(0, Vec::new())).await;
        pdu
    }

    /// Answer `count` Register PDUs with `status_for(subtree)`.
    /// Returns the registered subtrees in arrival order.
    pub async fn answer_registrations(
        &mut self,
        count: usize,
        status_for: impl Fn(&crate::oid::Oid) -> ErrorStatus,
    ) -> Vec<crate::oid::Oid> {
        let mut seen = Vec::with_capacity(count);
        for _ in 0..count {
            let (header, pdu) = self.recv().await.expect("subagent sent no Register");
            let Pdu::Register { subtree, .. } = pdu else {
                panic!("expected Register, got {:?}", pdu);
            };
            let status = status_for(&subtree);
            self.respond(&header, status, 0, Vec::new()).await;
            seen.push(subtree);
        }
        seen
    }

    /// Send a request and wait for the subagent's Response.
    ///
    /// PDUs without a Response (CleanupSet) must use [`send`](Self::send).
    pub async fn request(
        &mut self,
        session_id: u32,
        transaction_id: u32,
        pdu: Pdu,
    ) -> (Header, Pdu) {
        let packet_id = self.next_packet_id;
        self.next_packet_id += 1;
        let header = Header::new(pdu.pdu_type(), session_id, transaction_id, packet_id);
        self.send(&header, &pdu).await;
        let (h, reply) = self.recv().await.expect("subagent closed before responding");
        assert!(
            h.pdu_type == PduType::Response && h.packet_id == packet_id,
            "expected Response to {packet_id}, got {reply:?}"
        );
        (h, reply)
    }

    /// Drop the connection.
    pub async fn shutdown(mut self) {
        let _ = self.stream.shutdown().await;
    }
}
