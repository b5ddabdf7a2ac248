//! Scripted master agent for integration tests.
//!
//! Wraps the `testing` feature's [`MockMaster`] with helpers that track the
//! session id and unpack Responses.

use async_agentx::error::ErrorStatus;
use async_agentx::pdu::{Flags, Header, Pdu, PduType, SearchRange};
use async_agentx::transport::{MockConnector, MockListener, MockMaster, mock_master};
use async_agentx::{CloseReason, Oid, VarBind};

pub fn master_pair() -> (MockConnector, Listener) {
    let (connector, listener) = mock_master();
    (connector, Listener { inner: listener })
}

pub struct Listener {
    inner: MockListener,
}

impl Listener {
    pub async fn accept(&mut self) -> Master {
        let inner = self.inner.accept().await.expect("session never connected");
        Master {
            inner,
            session_id: 0,
        }
    }
}

/// Decoded Response fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub error: ErrorStatus,
    pub index: u16,
    pub varbinds: Vec<VarBind>,
}

pub struct Master {
    inner: MockMaster,
    pub session_id: u32,
}

impl Master {
    pub async fn recv(&mut self) -> Option<(Header, Pdu)> {
        self.inner.recv().await
    }

    /// Next PDU, which must be of type `expected`.
    pub async fn expect(&mut self, expected: PduType) -> (Header, Pdu) {
        let (header, pdu) = self.recv().await.expect("session closed the stream");
        assert_eq!(header.pdu_type, expected, "unexpected {pdu:?}");
        (header, pdu)
    }

    pub async fn send(&mut self, header: &Header, pdu: &Pdu) {
        self.inner.send(header, pdu).await;
    }

    pub async fn reply(&mut self, to: &Header, error: ErrorStatus) {
        self.inner.respond(to, error, 0, Vec::new()).await;
    }

    /// Accept the Open PDU, assigning `session_id`.
    pub async fn open(&mut self, session_id: u32) -> Pdu {
        self.session_id = session_id;
        self.inner.accept_open(session_id).await
    }

    /// Accept `count` Register PDUs; returns (subtree, instance flag).
    pub async fn accept_registrations(&mut self, count: usize) -> Vec<(Oid, bool)> {
        let mut seen = Vec::new();
        for _ in 0..count {
            let (header, pdu) = self.expect(PduType::Register).await;
            let Pdu::Register { subtree, .. } = pdu else {
                unreachable!()
            };
            seen.push((
                subtree,
                header.flags.contains(Flags::INSTANCE_REGISTRATION),
            ));
            self.reply(&header, ErrorStatus::NoError).await;
        }
        seen
    }

    /// Send a request in the current session and decode its Response.
    pub async fn request(&mut self, transaction_id: u32, pdu: Pdu) -> Reply {
        let (header, pdu) = self
            .inner
            .request(self.session_id, transaction_id, pdu)
            .await;
        assert_eq!(header.transaction_id, transaction_id);
        let Pdu::Response {
            error,
            index,
            varbinds,
            ..
        } = pdu
        else {
            unreachable!()
        };
        Reply {
            error,
            index,
            varbinds,
        }
    }

    pub async fn get(&mut self, oids: &[Oid]) -> Reply {
        let ranges = oids.iter().cloned().map(SearchRange::new).collect();
        self.request(0, Pdu::Get { context: None, ranges }).await
    }

    pub async fn get_next(&mut self, oids: &[Oid]) -> Reply {
        let ranges = oids.iter().cloned().map(SearchRange::new).collect();
        self.request(0, Pdu::GetNext { context: None, ranges }).await
    }

    pub async fn get_bulk(&mut self, non_repeaters: u16, max_repetitions: u16, oids: &[Oid]) -> Reply {
        let ranges = oids.iter().cloned().map(SearchRange::new).collect();
        let pdu = Pdu::GetBulk {
            context: None,
            non_repeaters,
            max_repetitions,
            ranges,
        };
        self.request(0, pdu).await
    }

    /// TestSet, then CommitSet if the test passed, then CleanupSet.
    /// Returns the TestSet reply and the CommitSet reply, if sent.
    pub async fn set(&mut self, transaction_id: u32, varbinds: Vec<VarBind>) -> (Reply, Option<Reply>) {
        let test = self
            .request(transaction_id, Pdu::TestSet { context: None, varbinds })
            .await;
        let commit = if test.error.is_ok() {
            Some(self.request(transaction_id, Pdu::CommitSet).await)
        } else {
            None
        };
        self.cleanup(transaction_id).await;
        (test, commit)
    }

    pub async fn cleanup(&mut self, transaction_id: u32) {
        let header = Header::new(PduType::CleanupSet, self.session_id, transaction_id, 0);
        self.send(&header, &Pdu::CleanupSet).await;
    }

    pub async fn close(&mut self, reason: CloseReason) {
        let header = Header::new(PduType::Close, self.session_id, 0, 0);
        self.send(&header, &Pdu::Close { reason }).await;
    }

    /// Drop the connection without a Close PDU.
    pub async fn hang_up(self) {
        self.inner.shutdown().await;
    }
}
