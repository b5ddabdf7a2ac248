//! AgentX session: connection lifecycle, request routing and the
//! dispatch loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;

use crate::binding::{BindingHandle, ObjectSpec};
use crate::error::{Error, ErrorStatus, Result};
use crate::handler::Response;
use crate::oid::Oid;
use crate::pdu::{AgentXCodec, CloseReason, Flags, Frame, Header, Pdu, PduType};
use crate::registry::{Registration, Registry, TableHandle, TableSpec};
use crate::transport::{BoxedStream, Connector, MasterAddress};
use crate::util::lock;
use crate::value::Value;
use crate::varbind::VarBind;

use super::builder::{SessionBuilder, SessionConfig};
use super::dispatch::dispatch;
use super::set_handler::SetCoordinator;

/// `snmpTrapOID.0` (RFC 3418).
pub const SNMP_TRAP_OID: [u32; 11] = [1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0];

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Opening,
    Open,
    Closing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Opening => "opening",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Outcome of [`Session::connect`].
#[derive(Debug, Clone, PartialEq)]
pub struct OpenSummary {
    /// Session ID assigned by the master.
    pub session_id: u32,
    /// Registrations the master accepted, in the order they were sent.
    pub registered: Vec<Registration>,
    /// Registrations the master refused, with its status.
    pub rejected: Vec<(Registration, ErrorStatus)>,
}

/// Response to a locally-originated PDU.
struct Reply {
    session_id: u32,
    error: ErrorStatus,
    index: u16,
}

/// Master-initiated traffic handed from the reader task to [`Session::run`].
enum Inbound {
    Request(Header, Pdu),
    Malformed(Header, Error),
    Failed(Error),
}

struct Link {
    state: SessionState,
    session_id: u32,
    generation: u64,
    cancel: Option<CancellationToken>,
    close_reason: Option<CloseReason>,
}

struct Shared {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    registry: Registry,
    started: Instant,
    next_packet_id: AtomicU32,
    link: Mutex<Link>,
    writer: tokio::sync::Mutex<Option<WriteHalf<BoxedStream>>>,
    pending: Mutex<HashMap<u32, oneshot::Sender<Reply>>>,
}

impl Shared {
    fn state(&self) -> SessionState {
        lock(&self.link).state
    }

    fn session_id(&self) -> u32 {
        lock(&self.link).session_id
    }

    fn sys_uptime(&self) -> u32 {
        // TimeTicks wrap modulo 2^32
        (self.started.elapsed().as_millis() / 10) as u32
    }

    fn next_packet_id(&self) -> u32 {
        self.next_packet_id.fetch_add(1, Ordering::Relaxed)
    }

    fn io_error(&self, source: std::io::Error) -> Error {
        Error::Io {
            target: Some(self.connector.target().into()),
            source,
        }
    }

    /// Encode and write one PDU under the writer lock.
    async fn send(&self, header: &Header, pdu: &Pdu) -> Result<()> {
        let mut buf = BytesMut::new();
        AgentXCodec::new().encode((header, pdu), &mut buf)?;

        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or(Error::NotOpen)?;
        stream
            .write_all(&buf)
            .await
            .map_err(|e| self.io_error(e))?;
        stream.flush().await.map_err(|e| self.io_error(e))?;
        tracing::trace!(
            agentx.session_id = header.session_id,
            agentx.packet_id = header.packet_id,
            pdu_type = %pdu.pdu_type(),
            agentx.bytes = buf.len(),
            "sent PDU"
        );
        Ok(())
    }

    /// Send a PDU and wait for the Response with the same packet ID.
    async fn request(&self, pdu: Pdu, flags: Flags) -> Result<Reply> {
        let packet_id = self.next_packet_id();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(packet_id, tx);

        let mut header = Header::new(pdu.pdu_type(), self.session_id(), 0, packet_id);
        header.flags.insert(flags);
        if let Err(e) = self.send(&header, &pdu).await {
            lock(&self.pending).remove(&packet_id);
            return Err(e);
        }

        let timeout = self.config.request_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                lock(&self.pending).remove(&packet_id);
                tracing::debug!(agentx.packet_id = packet_id, "request timed out");
                Err(Error::Timeout {
                    elapsed: timeout,
                    packet_id,
                })
            }
        }
    }

    /// Hand a Response to whoever is waiting for it.
    fn route(&self, header: &Header, reply: Reply) {
        match lock(&self.pending).remove(&header.packet_id) {
            Some(waiter) => {
                let _ = waiter.send(reply);
            }
            None => tracing::trace!(
                agentx.packet_id = header.packet_id,
                "response with no waiter"
            ),
        }
    }

    fn require_open(&self) -> Result<()> {
        match self.state() {
            SessionState::Open => Ok(()),
            _ => Err(Error::NotOpen),
        }
    }

    async fn register(&self, registration: &Registration) -> Result<()> {
        let pdu = Pdu::Register {
            context: registration.context.clone(),
            timeout: 0,
            priority: self.config.priority,
            subtree: registration.subtree.clone(),
            range_subid: 0,
            upper_bound: None,
        };
        let flags = if registration.instance {
            Flags::INSTANCE_REGISTRATION
        } else {
            Flags::empty()
        };
        let reply = self.request(pdu, flags).await?;
        if !reply.error.is_ok() {
            return Err(Error::Registration {
                oid: registration.subtree.clone(),
                status: reply.error,
            });
        }
        tracing::debug!(agentx.oid = %registration.subtree, "registered with master");
        Ok(())
    }

    async fn unregister(&self, registration: &Registration) -> Result<()> {
        let pdu = Pdu::Unregister {
            context: registration.context.clone(),
            priority: self.config.priority,
            subtree: registration.subtree.clone(),
            range_subid: 0,
            upper_bound: None,
        };
        let reply = self.request(pdu, Flags::empty()).await?;
        if !reply.error.is_ok() {
            return Err(Error::Registration {
                oid: registration.subtree.clone(),
                status: reply.error,
            });
        }
        Ok(())
    }

    /// Register new local entries with the master, all or none.
    async fn announce(&self, registrations: &[Registration]) -> Result<()> {
        for (done, registration) in registrations.iter().enumerate() {
            if let Err(e) = self.register(registration).await {
                for announced in &registrations[..done] {
                    if let Err(undo) = self.unregister(announced).await {
                        tracing::warn!(
                            agentx.oid = %announced.subtree,
                            error = %undo,
                            "could not withdraw registration"
                        );
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Drop the connection. With `generation`, only if that connection is
    /// still the current one. Returns `false` if there was nothing to do.
    async fn teardown(&self, generation: Option<u64>) -> bool {
        let mut writer = self.writer.lock().await;
        {
            let mut link = lock(&self.link);
            if link.state == SessionState::Disconnected {
                return false;
            }
            if let Some(g) = generation
                && g != link.generation
            {
                return false;
            }
            link.state = SessionState::Disconnected;
            link.session_id = 0;
            if let Some(cancel) = link.cancel.take() {
                cancel.cancel();
            }
        }
        if let Some(mut stream) = writer.take() {
            let _ = stream.shutdown().await;
        }
        // dropping the senders wakes every waiter with `Closed`
        lock(&self.pending).clear();
        true
    }
}

/// Reads PDUs until the connection fails or is cancelled. Responses go to
/// their waiters; everything else goes to the dispatch loop.
async fn read_loop(
    shared: Arc<Shared>,
    mut reader: ReadHalf<BoxedStream>,
    generation: u64,
    cancel: CancellationToken,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    let mut codec = AgentXCodec::with_max_payload(shared.config.max_payload);
    let mut buf = BytesMut::with_capacity(4096);

    let failure = loop {
        match codec.decode(&mut buf) {
            Ok(Some(Frame::Pdu(header, pdu))) => {
                tracing::trace!(
                    agentx.session_id = header.session_id,
                    agentx.packet_id = header.packet_id,
                    pdu_type = %header.pdu_type,
                    "received PDU"
                );
                match pdu {
                    Pdu::Response { error, index, .. } => shared.route(
                        &header,
                        Reply {
                            session_id: header.session_id,
                            error,
                            index,
                        },
                    ),
                    pdu => {
                        let _ = inbound.send(Inbound::Request(header, pdu));
                    }
                }
                continue;
            }
            Ok(Some(Frame::Malformed { header, error })) => {
                let _ = inbound.send(Inbound::Malformed(header, error));
                continue;
            }
            Ok(None) => {}
            Err(e) => break e,
        }

        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = reader.read_buf(&mut buf) => read,
        };
        match read {
            Ok(0) => {
                break shared.io_error(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "master agent closed the connection",
                ));
            }
            Ok(_) => {}
            Err(e) => break shared.io_error(e),
        }
    };

    if matches!(failure, Error::Decode { .. }) {
        // the stream position is lost; tell the master why we leave
        let header = Header::new(
            PduType::Close,
            shared.session_id(),
            0,
            shared.next_packet_id(),
        );
        let close = Pdu::Close {
            reason: CloseReason::ParseError,
        };
        let _ = shared.send(&header, &close).await;
    }
    if shared.teardown(Some(generation)).await {
        tracing::warn!(error = %failure, "connection to master agent lost");
        let _ = inbound.send(Inbound::Failed(failure));
    }
}

/// Answer one master request.
async fn answer(
    shared: &Shared,
    sets: &mut SetCoordinator,
    header: &Header,
    pdu: &Pdu,
) -> Result<()> {
    let response = if header.session_id != shared.session_id() {
        tracing::warn!(
            agentx.session_id = header.session_id,
            agentx.packet_id = header.packet_id,
            "request for a session that is not open"
        );
        Some(Response::error(ErrorStatus::NotOpen, 0, Vec::new()))
    } else {
        dispatch(&shared.registry, sets, header, pdu)
    };

    let Some(response) = response else {
        return Ok(());
    };
    let reply = Pdu::error_response(
        shared.sys_uptime(),
        response.error_status,
        response.error_index,
        response.varbinds,
    );
    match shared.send(&header.response(), &reply).await {
        Err(Error::InvalidOid { kind, .. }) => {
            tracing::warn!(
                agentx.packet_id = header.packet_id,
                %kind,
                "response not encodable"
            );
            let fallback = Pdu::error_response(
                shared.sys_uptime(),
                ErrorStatus::ProcessingError,
                0,
                Vec::new(),
            );
            shared.send(&header.response(), &fallback).await
        }
        result => result,
    }
}

/// A subagent session with one master agent.
///
/// The session owns the registry's announcement state: entries registered
/// while disconnected are sent on [`connect`](Self::connect), and sent again
/// on every [`reconnect`](Self::reconnect).
///
/// ```rust,no_run
/// use async_agentx::binding::ObjectSpec;
/// use async_agentx::{MasterAddress, Session, oid};
///
/// # async fn example() -> async_agentx::Result<()> {
/// let mut session = Session::builder(MasterAddress::default()).build();
/// let counter = session
///     .register_scalar(oid!(1, 3, 6, 1, 4, 1, 99999, 1, 0), ObjectSpec::counter32(0))
///     .await?;
///
/// session.connect().await?;
/// counter.increment(1)?;
/// let reason = session.run().await?;
/// println!("master closed the session: {reason}");
/// # Ok(())
/// # }
/// ```
pub struct Session {
    handle: SessionHandle,
    sets: SetCoordinator,
    inbound: Option<mpsc::UnboundedReceiver<Inbound>>,
}

impl Session {
    /// Start building a session for the master at `address`.
    pub fn builder(address: MasterAddress) -> SessionBuilder {
        SessionBuilder::new(address)
    }

    pub(crate) fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        registry: Registry,
    ) -> Self {
        let shared = Shared {
            config,
            connector,
            registry,
            started: Instant::now(),
            next_packet_id: AtomicU32::new(1),
            link: Mutex::new(Link {
                state: SessionState::Disconnected,
                session_id: 0,
                generation: 0,
                cancel: None,
                close_reason: None,
            }),
            writer: tokio::sync::Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
        };
        Self {
            handle: SessionHandle {
                shared: Arc::new(shared),
            },
            sets: SetCoordinator::new(),
            inbound: None,
        }
    }

    /// A cloneable handle for use from other tasks.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.handle.shared.config
    }

    pub fn registry(&self) -> &Registry {
        self.handle.registry()
    }

    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// Session ID assigned by the master, while open.
    pub fn session_id(&self) -> Option<u32> {
        self.handle.session_id()
    }

    /// Connect, open the session and register every registry entry.
    ///
    /// Registrations the master refuses are reported in the summary and do
    /// not fail the call.
    pub async fn connect(&mut self) -> Result<OpenSummary> {
        let shared = self.handle.shared.clone();
        {
            let mut link = lock(&shared.link);
            if link.state != SessionState::Disconnected {
                return Err(Error::AlreadyOpen);
            }
            link.state = SessionState::Opening;
        }
        self.sets.discard_all();

        match self.open(&shared).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                shared.teardown(None).await;
                // teardown is a no-op if the reader already noticed
                lock(&shared.link).state = SessionState::Disconnected;
                self.inbound = None;
                Err(e)
            }
        }
    }

    async fn open(&mut self, shared: &Arc<Shared>) -> Result<OpenSummary> {
        let target = shared.connector.target();
        tracing::debug!(agentx.target = %target, "connecting to master agent");
        let stream = shared.connector.connect().await?;
        let (reader, writer) = tokio::io::split(stream);

        let cancel = CancellationToken::new();
        let generation = {
            let mut slot = shared.writer.lock().await;
            *slot = Some(writer);
            let mut link = lock(&shared.link);
            link.generation += 1;
            link.cancel = Some(cancel.clone());
            link.generation
        };
        let (tx, rx) = mpsc::unbounded_channel();
        self.inbound = Some(rx);
        tokio::spawn(read_loop(shared.clone(), reader, generation, cancel, tx));

        let open = Pdu::Open {
            timeout: shared.config.timeout,
            id: shared.config.agent_id.clone(),
            description: Bytes::from(shared.config.description.clone()),
        };
        let reply = shared.request(open, Flags::empty()).await?;
        if !reply.error.is_ok() {
            tracing::warn!(agentx.target = %target, status = %reply.error, "master refused Open");
            return Err(Error::OpenFailed {
                status: reply.error,
            });
        }

        {
            let mut link = lock(&shared.link);
            link.session_id = reply.session_id;
            link.state = SessionState::Open;
            link.close_reason = None;
        }
        tracing::info!(
            agentx.session_id = reply.session_id,
            agentx.target = %target,
            "session open"
        );

        let mut summary = OpenSummary {
            session_id: reply.session_id,
            registered: Vec::new(),
            rejected: Vec::new(),
        };
        for registration in shared.registry.registrations() {
            match shared.register(&registration).await {
                Ok(()) => summary.registered.push(registration),
                Err(Error::Registration { status, .. }) => {
                    tracing::warn!(
                        agentx.oid = %registration.subtree,
                        %status,
                        "master refused registration"
                    );
                    summary.rejected.push((registration, status));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }

    /// Close the current connection (if any) and open a new one.
    pub async fn reconnect(&mut self) -> Result<OpenSummary> {
        if self.state() != SessionState::Disconnected {
            self.close(CloseReason::Other).await?;
        }
        self.connect().await
    }

    /// Serve master requests until the session ends.
    ///
    /// Returns the close reason when the master closes the session or the
    /// session is closed locally, and an error when the transport fails.
    /// Pending set transactions are discarded either way.
    pub async fn run(&mut self) -> Result<CloseReason> {
        let shared = self.handle.shared.clone();
        let inbound = self.inbound.as_mut().ok_or(Error::NotOpen)?;

        let result = loop {
            let Some(message) = inbound.recv().await else {
                // reader stopped without a failure: closed locally
                let reason = lock(&shared.link).close_reason.take();
                break Ok(reason.unwrap_or(CloseReason::Shutdown));
            };
            match message {
                Inbound::Request(_, Pdu::Close { reason }) => {
                    tracing::info!(
                        agentx.session_id = shared.session_id(),
                        %reason,
                        "master closed the session"
                    );
                    shared.teardown(None).await;
                    break Ok(reason);
                }
                Inbound::Request(header, pdu) => {
                    if let Err(e) = answer(&shared, &mut self.sets, &header, &pdu).await {
                        if e.is_fatal() {
                            shared.teardown(None).await;
                            break Err(e);
                        }
                        tracing::debug!(error = %e, "could not answer request");
                    }
                }
                Inbound::Malformed(header, error) => {
                    tracing::warn!(
                        agentx.packet_id = header.packet_id,
                        %error,
                        "malformed PDU from master"
                    );
                    let reply = Pdu::error_response(
                        shared.sys_uptime(),
                        ErrorStatus::ParseError,
                        0,
                        Vec::new(),
                    );
                    if let Err(e) = shared.send(&header.response(), &reply).await
                        && e.is_fatal()
                    {
                        shared.teardown(None).await;
                        break Err(e);
                    }
                }
                Inbound::Failed(error) => break Err(error),
            }
        };

        self.inbound = None;
        self.sets.discard_all();
        result
    }

    /// Close the session, sending a Close PDU while the transport is usable.
    /// The registry is kept for a later [`connect`](Self::connect).
    pub async fn close(&mut self, reason: CloseReason) -> Result<()> {
        self.handle.close(reason).await?;
        self.sets.discard_all();
        self.inbound = None;
        Ok(())
    }

    /// See [`SessionHandle::register_scalar`].
    pub async fn register_scalar(&self, oid: Oid, spec: ObjectSpec) -> Result<BindingHandle> {
        self.handle.register_scalar(oid, spec).await
    }

    /// See [`SessionHandle::register_table`].
    pub async fn register_table(&self, base: Oid, spec: TableSpec) -> Result<TableHandle> {
        self.handle.register_table(base, spec).await
    }

    /// See [`SessionHandle::unregister`].
    pub async fn unregister(&self, oid: &Oid) -> Result<()> {
        self.handle.unregister(oid).await
    }

    /// See [`SessionHandle::notify`].
    pub async fn notify(&self, trap_oid: Oid, varbinds: Vec<VarBind>) -> Result<()> {
        self.handle.notify(trap_oid, varbinds).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(cancel) = lock(&self.handle.shared.link).cancel.take() {
            cancel.cancel();
        }
    }
}

/// Cloneable handle to a [`Session`].
///
/// Registration, notifications and close work from any task while the
/// session's [`run`](Session::run) loop serves the master.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let link = lock(&self.shared.link);
        f.debug_struct("SessionHandle")
            .field("target", &self.shared.connector.target())
            .field("state", &link.state)
            .field("session_id", &link.session_id)
            .finish()
    }
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Session ID assigned by the master, while open.
    pub fn session_id(&self) -> Option<u32> {
        let link = lock(&self.shared.link);
        (link.state == SessionState::Open).then_some(link.session_id)
    }

    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// Description of the master agent's address.
    pub fn target(&self) -> String {
        self.shared.connector.target()
    }

    /// Centiseconds since the session was built.
    pub fn sys_uptime(&self) -> u32 {
        self.shared.sys_uptime()
    }

    /// Register a scalar. While open, the master is told immediately and a
    /// refusal undoes the local registration.
    pub async fn register_scalar(&self, oid: Oid, spec: ObjectSpec) -> Result<BindingHandle> {
        self.register_scalar_in(None, oid, spec).await
    }

    pub async fn register_scalar_in(
        &self,
        context: Option<Bytes>,
        oid: Oid,
        spec: ObjectSpec,
    ) -> Result<BindingHandle> {
        let binding = self
            .shared
            .registry
            .register_scalar_in(context.clone(), oid.clone(), spec)?;
        self.announce_new(context, &[oid]).await?;
        Ok(binding)
    }

    /// Register a table (and its row-count scalar, if any).
    pub async fn register_table(&self, base: Oid, spec: TableSpec) -> Result<TableHandle> {
        self.register_table_in(None, base, spec).await
    }

    pub async fn register_table_in(
        &self,
        context: Option<Bytes>,
        base: Oid,
        spec: TableSpec,
    ) -> Result<TableHandle> {
        let row_count = spec.row_count.clone();
        let table = self
            .shared
            .registry
            .register_table_in(context.clone(), base.clone(), spec)?;
        let mut oids = vec![base];
        oids.extend(row_count);
        self.announce_new(context, &oids).await?;
        Ok(table)
    }

    /// Tell the master about freshly registered local entries. On refusal
    /// the first OID's entry (and anything it owns) is removed again.
    async fn announce_new(&self, context: Option<Bytes>, oids: &[Oid]) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        let registrations: Vec<Registration> = oids
            .iter()
            .filter_map(|oid| self.shared.registry.registration_at(context.as_ref(), oid))
            .collect();
        match self.shared.announce(&registrations).await {
            Err(e @ Error::Registration { .. }) => {
                let _ = self.shared.registry.unregister_in(context, &oids[0]);
                Err(e)
            }
            other => other,
        }
    }

    /// Remove a local entry and unregister it with the master.
    pub async fn unregister(&self, oid: &Oid) -> Result<()> {
        self.unregister_in(None, oid).await
    }

    pub async fn unregister_in(&self, context: Option<Bytes>, oid: &Oid) -> Result<()> {
        let row_count = self.shared.registry.table_row_count(context.as_ref(), oid);
        let registration = self.shared.registry.unregister_in(context.clone(), oid)?;
        if !self.is_open() {
            return Ok(());
        }
        self.shared.unregister(&registration).await?;
        if let Some(count) = row_count {
            let count_registration = Registration {
                context,
                subtree: count,
                instance: true,
            };
            self.shared.unregister(&count_registration).await?;
        }
        Ok(())
    }

    /// Send a notification: `snmpTrapOID.0 = trap_oid` followed by
    /// `varbinds`. The master's Response is not awaited.
    pub async fn notify(&self, trap_oid: Oid, varbinds: Vec<VarBind>) -> Result<()> {
        self.notify_in(None, trap_oid, varbinds).await
    }

    pub async fn notify_in(
        &self,
        context: Option<Bytes>,
        trap_oid: Oid,
        varbinds: Vec<VarBind>,
    ) -> Result<()> {
        self.shared.require_open()?;
        let mut all = Vec::with_capacity(varbinds.len() + 1);
        all.push(VarBind::new(
            Oid::from_slice(&SNMP_TRAP_OID),
            Value::ObjectIdentifier(trap_oid.clone()),
        ));
        all.extend(varbinds);

        let header = Header::new(
            PduType::Notify,
            self.shared.session_id(),
            0,
            self.shared.next_packet_id(),
        );
        self.shared
            .send(
                &header,
                &Pdu::Notify {
                    context,
                    varbinds: all,
                },
            )
            .await?;
        tracing::debug!(agentx.oid = %trap_oid, "sent notification");
        Ok(())
    }

    /// Send a notification carrying the current values of `bindings`.
    pub async fn notify_bindings(&self, trap_oid: Oid, bindings: &[BindingHandle]) -> Result<()> {
        let varbinds = bindings
            .iter()
            .map(|b| VarBind::new(b.oid().clone(), b.get()))
            .collect();
        self.notify(trap_oid, varbinds).await
    }

    /// Ping the master.
    pub async fn ping(&self) -> Result<()> {
        self.shared.require_open()?;
        let reply = self
            .shared
            .request(Pdu::Ping { context: None }, Flags::empty())
            .await?;
        master_status(reply)
    }

    /// Add an entry to the master's sysORTable.
    pub async fn add_agent_caps(&self, id: Oid, description: &str) -> Result<()> {
        self.shared.require_open()?;
        let pdu = Pdu::AddAgentCaps {
            context: None,
            id,
            description: Bytes::copy_from_slice(description.as_bytes()),
        };
        let reply = self.shared.request(pdu, Flags::empty()).await?;
        master_status(reply)
    }

    /// Remove a sysORTable entry added with [`add_agent_caps`](Self::add_agent_caps).
    pub async fn remove_agent_caps(&self, id: Oid) -> Result<()> {
        self.shared.require_open()?;
        let pdu = Pdu::RemoveAgentCaps { context: None, id };
        let reply = self.shared.request(pdu, Flags::empty()).await?;
        master_status(reply)
    }

    /// Send Close and drop the connection. A no-op when not connected.
    pub async fn close(&self, reason: CloseReason) -> Result<()> {
        let session_id = {
            let mut link = lock(&self.shared.link);
            match link.state {
                SessionState::Disconnected | SessionState::Closing => return Ok(()),
                SessionState::Opening | SessionState::Open => {}
            }
            link.state = SessionState::Closing;
            link.close_reason = Some(reason);
            link.session_id
        };

        let header = Header::new(PduType::Close, session_id, 0, self.shared.next_packet_id());
        if let Err(e) = self.shared.send(&header, &Pdu::Close { reason }).await {
            tracing::debug!(error = %e, "could not send Close");
        }
        self.shared.teardown(None).await;
        tracing::info!(agentx.session_id = session_id, %reason, "session closed");
        Ok(())
    }
}

fn master_status(reply: Reply) -> Result<()> {
    if reply.error.is_ok() {
        Ok(())
    } else {
        tracing::debug!(index = reply.index, status = %reply.error, "master returned an error");
        Err(Error::Master {
            status: reply.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::oid;
    use crate::pdu::SearchRange;
    use crate::transport::{MockListener, MockMaster, mock_master};

    const SID: u32 = 42;

    fn enterprise(arcs: &[u32]) -> Oid {
        oid!(1, 3, 6, 1, 4, 1, 99999).concat(arcs)
    }

    fn session() -> (Session, MockListener) {
        let (connector, listener) = mock_master();
        let session = Session::builder(MasterAddress::default())
            .connector(connector)
            .request_timeout(Duration::from_millis(500))
            .build();
        (session, listener)
    }

    /// Connect and accept `registrations` Register PDUs.
    async fn open(
        session: &mut Session,
        listener: &mut MockListener,
        registrations: usize,
    ) -> MockMaster {
        let (summary, master) = tokio::join!(session.connect(), async {
            let mut master = listener.accept().await.unwrap();
            master.accept_open(SID).await;
            master
                .answer_registrations(registrations, |_| ErrorStatus::NoError)
                .await;
            master
        });
        assert_eq!(summary.unwrap().session_id, SID);
        master
    }

    fn spawn_run(
        mut session: Session,
    ) -> tokio::task::JoinHandle<(Session, Result<CloseReason>)> {
        tokio::spawn(async move {
            let result = session.run().await;
            (session, result)
        })
    }

    fn response(pdu: Pdu) -> (ErrorStatus, u16, Vec<VarBind>) {
        match pdu {
            Pdu::Response {
                error,
                index,
                varbinds,
                ..
            } => (error, index, varbinds),
            other => panic!("expected Response, got {other:?}"),
        }
    }

    fn get(oid: Oid) -> Pdu {
        Pdu::Get {
            context: None,
            ranges: vec![SearchRange::new(oid)],
        }
    }

    #[tokio::test]
    async fn test_connect_registers_in_order() {
        let (mut session, mut listener) = session();
        session
            .register_scalar(enterprise(&[2, 0]), ObjectSpec::integer32(2))
            .await
            .unwrap();
        session
            .register_scalar(enterprise(&[1, 0]), ObjectSpec::integer32(1))
            .await
            .unwrap();

        let (summary, (_master, seen)) = tokio::join!(session.connect(), async {
            let mut master = listener.accept().await.unwrap();
            let open = master.accept_open(SID).await;
            assert!(
                matches!(&open, Pdu::Open { description, .. } if &description[..] == b"async-agentx subagent")
            );
            let mut seen = Vec::new();
            for _ in 0..2 {
                let (header, pdu) = master.recv().await.unwrap();
                assert_eq!(header.session_id, SID);
                assert!(header.flags.contains(Flags::INSTANCE_REGISTRATION));
                let Pdu::Register { subtree, .. } = pdu else {
                    panic!("expected Register, got {pdu:?}");
                };
                master.respond(&header, ErrorStatus::NoError, 0, Vec::new()).await;
                seen.push(subtree);
            }
            (master, seen)
        });

        let summary = summary.unwrap();
        assert_eq!(seen, vec![enterprise(&[1, 0]), enterprise(&[2, 0])]);
        assert_eq!(summary.registered.len(), 2);
        assert!(summary.rejected.is_empty());
        assert!(session.is_open());
        assert_eq!(session.session_id(), Some(SID));
    }

    #[tokio::test]
    async fn test_connect_reports_rejected_registrations() {
        let (mut session, mut listener) = session();
        for arc in 1..=2 {
            session
                .register_scalar(enterprise(&[arc, 0]), ObjectSpec::integer32(0))
                .await
                .unwrap();
        }
        let refused = enterprise(&[2, 0]);
        let (summary, _master) = tokio::join!(session.connect(), async {
            let mut master = listener.accept().await.unwrap();
            master.accept_open(SID).await;
            master
                .answer_registrations(2, |oid| {
                    if *oid == refused {
                        ErrorStatus::DuplicateRegistration
                    } else {
                        ErrorStatus::NoError
                    }
                })
                .await;
            master
        });

        let summary = summary.unwrap();
        assert_eq!(summary.registered.len(), 1);
        assert_eq!(summary.rejected.len(), 1);
        assert_eq!(summary.rejected[0].0.subtree, enterprise(&[2, 0]));
        assert_eq!(summary.rejected[0].1, ErrorStatus::DuplicateRegistration);
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (connector, _listener) = mock_master();
        connector.set_refuse(true);
        let mut session = Session::builder(MasterAddress::default())
            .connector(connector)
            .build();

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_open_refused() {
        let (mut session, mut listener) = session();
        let (result, _master) = tokio::join!(session.connect(), async {
            let mut master = listener.accept().await.unwrap();
            let (header, _) = master.recv().await.unwrap();
            master
                .respond(&header, ErrorStatus::OpenFailed, 0, Vec::new())
                .await;
            master
        });

        assert!(matches!(
            result,
            Err(Error::OpenFailed {
                status: ErrorStatus::OpenFailed
            })
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_twice_fails() {
        let (mut session, mut listener) = session();
        let _master = open(&mut session, &mut listener, 0).await;
        assert!(matches!(session.connect().await, Err(Error::AlreadyOpen)));
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn test_run_answers_get_until_master_close() {
        let (mut session, mut listener) = session();
        session
            .register_scalar(enterprise(&[1, 0]), ObjectSpec::integer32(7))
            .await
            .unwrap();
        let mut master = open(&mut session, &mut listener, 1).await;
        let run = spawn_run(session);

        let (header, reply) = master.request(SID, 0, get(enterprise(&[1, 0]))).await;
        assert_eq!(header.session_id, SID);
        let (error, _, varbinds) = response(reply);
        assert_eq!(error, ErrorStatus::NoError);
        assert_eq!(
            varbinds,
            vec![VarBind::new(enterprise(&[1, 0]), Value::Integer(7))]
        );

        master
            .send(
                &Header::new(PduType::Close, SID, 0, 9),
                &Pdu::Close {
                    reason: CloseReason::Shutdown,
                },
            )
            .await;
        let (session, result) = run.await.unwrap();
        assert_eq!(result.unwrap(), CloseReason::Shutdown);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_set_failure_leaves_values_unchanged() {
        let (mut session, mut listener) = session();
        let a = session
            .register_scalar(enterprise(&[1, 0]), ObjectSpec::integer32(1).read_write())
            .await
            .unwrap();
        let b = session
            .register_scalar(
                enterprise(&[2, 0]),
                ObjectSpec::integer32(2).read_write().range(0, 100),
            )
            .await
            .unwrap();
        let mut master = open(&mut session, &mut listener, 2).await;
        let _run = spawn_run(session);

        let test = Pdu::TestSet {
            context: None,
            varbinds: vec![
                VarBind::new(enterprise(&[1, 0]), Value::Integer(5)),
                VarBind::new(enterprise(&[2, 0]), Value::Integer(1000)),
            ],
        };
        let (_, reply) = master.request(SID, 7, test).await;
        let (error, index, _) = response(reply);
        assert_eq!(error, ErrorStatus::WrongValue);
        assert_eq!(index, 2);
        master
            .send(&Header::new(PduType::CleanupSet, SID, 7, 50), &Pdu::CleanupSet)
            .await;

        assert_eq!(a.get(), Value::Integer(1));
        assert_eq!(b.get(), Value::Integer(2));
    }

    #[tokio::test]
    async fn test_set_commit_then_undo() {
        let (mut session, mut listener) = session();
        let a = session
            .register_scalar(enterprise(&[1, 0]), ObjectSpec::integer32(1).read_write())
            .await
            .unwrap();
        let mut master = open(&mut session, &mut listener, 1).await;
        let _run = spawn_run(session);

        let test = Pdu::TestSet {
            context: None,
            varbinds: vec![VarBind::new(enterprise(&[1, 0]), Value::Integer(9))],
        };
        let (_, reply) = master.request(SID, 3, test).await;
        assert_eq!(response(reply).0, ErrorStatus::NoError);
        let (_, reply) = master.request(SID, 3, Pdu::CommitSet).await;
        assert_eq!(response(reply).0, ErrorStatus::NoError);
        assert_eq!(a.get(), Value::Integer(9));

        let (_, reply) = master.request(SID, 3, Pdu::UndoSet).await;
        assert_eq!(response(reply).0, ErrorStatus::NoError);
        assert_eq!(a.get(), Value::Integer(1));
    }

    #[tokio::test]
    async fn test_master_close_discards_pending_set() {
        let (mut session, mut listener) = session();
        let a = session
            .register_scalar(enterprise(&[1, 0]), ObjectSpec::integer32(1).read_write())
            .await
            .unwrap();
        let mut master = open(&mut session, &mut listener, 1).await;
        let run = spawn_run(session);

        let test = Pdu::TestSet {
            context: None,
            varbinds: vec![VarBind::new(enterprise(&[1, 0]), Value::Integer(5))],
        };
        let (_, reply) = master.request(SID, 4, test).await;
        assert_eq!(response(reply).0, ErrorStatus::NoError);

        master
            .send(
                &Header::new(PduType::Close, SID, 0, 10),
                &Pdu::Close {
                    reason: CloseReason::Shutdown,
                },
            )
            .await;
        let (session, result) = run.await.unwrap();
        assert_eq!(result.unwrap(), CloseReason::Shutdown);
        assert_eq!(session.sets.len(), 0);
        assert_eq!(a.get(), Value::Integer(1));
    }

    #[tokio::test]
    async fn test_wrong_session_id_is_not_open() {
        let (mut session, mut listener) = session();
        let mut master = open(&mut session, &mut listener, 0).await;
        let _run = spawn_run(session);

        let (_, reply) = master.request(SID + 1, 0, get(enterprise(&[1, 0]))).await;
        assert_eq!(response(reply).0, ErrorStatus::NotOpen);
    }

    #[tokio::test]
    async fn test_malformed_pdu_gets_parse_error() {
        let (mut session, mut listener) = session();
        let mut master = open(&mut session, &mut listener, 0).await;
        let run = spawn_run(session);

        // Get whose search range claims 200 sub-identifiers
        let mut header = Header::new(PduType::Get, SID, 0, 77);
        header.payload_length = 4;
        let mut raw = BytesMut::new();
        header.encode(&mut raw);
        raw.extend_from_slice(&[200, 0, 0, 0]);
        master.send_raw(&raw).await;

        let (header, reply) = master.recv().await.unwrap();
        assert_eq!(header.packet_id, 77);
        assert_eq!(response(reply).0, ErrorStatus::ParseError);

        // the session keeps serving
        let (_, reply) = master.request(SID, 0, get(enterprise(&[1, 0]))).await;
        assert_eq!(
            response(reply).2,
            vec![VarBind::new(enterprise(&[1, 0]), Value::NoSuchObject)]
        );
        assert!(!run.is_finished());
    }

    #[tokio::test]
    async fn test_local_close() {
        let (mut session, mut listener) = session();
        let handle = session.handle();
        let mut master = open(&mut session, &mut listener, 0).await;
        let run = spawn_run(session);

        handle.close(CloseReason::Shutdown).await.unwrap();
        let (header, pdu) = master.recv().await.unwrap();
        assert_eq!(header.session_id, SID);
        assert_eq!(
            pdu,
            Pdu::Close {
                reason: CloseReason::Shutdown
            }
        );
        assert!(master.recv().await.is_none());

        let (session, result) = run.await.unwrap();
        assert_eq!(result.unwrap(), CloseReason::Shutdown);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(handle.ping().await, Err(Error::NotOpen)));
    }

    #[tokio::test]
    async fn test_transport_loss_then_reconnect() {
        let (mut session, mut listener) = session();
        session
            .register_scalar(enterprise(&[1, 0]), ObjectSpec::integer32(1))
            .await
            .unwrap();
        session
            .register_table(
                enterprise(&[5, 1]),
                TableSpec::new()
                    .index(crate::registry::IndexType::Integer32)
                    .column(2, ObjectSpec::integer32(0)),
            )
            .await
            .unwrap();
        let master = open(&mut session, &mut listener, 2).await;
        let run = spawn_run(session);

        master.shutdown().await;
        let (mut session, result) = run.await.unwrap();
        assert!(matches!(result, Err(Error::Io { .. })));
        assert_eq!(session.state(), SessionState::Disconnected);

        let (summary, _master) = tokio::join!(session.reconnect(), async {
            let mut master = listener.accept().await.unwrap();
            master.accept_open(SID + 1).await;
            let seen = master
                .answer_registrations(2, |_| ErrorStatus::NoError)
                .await;
            assert_eq!(seen, vec![enterprise(&[1, 0]), enterprise(&[5, 1])]);
            master
        });
        let summary = summary.unwrap();
        assert_eq!(summary.session_id, SID + 1);
        assert_eq!(summary.registered.len(), 2);
        assert_eq!(session.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_register_while_open_rolls_back_on_refusal() {
        let (mut session, mut listener) = session();
        let handle = session.handle();
        let mut master = open(&mut session, &mut listener, 0).await;

        let (result, ()) = tokio::join!(
            handle.register_scalar(enterprise(&[3, 0]), ObjectSpec::integer32(0)),
            async {
                let (header, pdu) = master.recv().await.unwrap();
                assert!(matches!(pdu, Pdu::Register { .. }));
                master
                    .respond(&header, ErrorStatus::DuplicateRegistration, 0, Vec::new())
                    .await;
            }
        );

        assert!(matches!(
            result,
            Err(Error::Registration {
                status: ErrorStatus::DuplicateRegistration,
                ..
            })
        ));
        assert!(handle.registry().is_empty());
    }

    #[tokio::test]
    async fn test_register_table_while_open_sends_row_count() {
        let (mut session, mut listener) = session();
        let handle = session.handle();
        let mut master = open(&mut session, &mut listener, 0).await;

        let spec = TableSpec::new()
            .index(crate::registry::IndexType::Integer32)
            .column(2, ObjectSpec::integer32(0))
            .row_count(enterprise(&[4, 0]));
        let (table, seen) = tokio::join!(handle.register_table(enterprise(&[5, 1]), spec), async {
            master.answer_registrations(2, |_| ErrorStatus::NoError).await
        });

        assert!(table.is_ok());
        assert_eq!(seen, vec![enterprise(&[5, 1]), enterprise(&[4, 0])]);
    }

    #[tokio::test]
    async fn test_table_rollback_survives_refused_unregister() {
        let (mut session, mut listener) = session();
        let handle = session.handle();
        let mut master = open(&mut session, &mut listener, 0).await;

        let spec = TableSpec::new()
            .index(crate::registry::IndexType::Integer32)
            .column(2, ObjectSpec::integer32(0))
            .row_count(enterprise(&[4, 0]));
        let (result, ()) = tokio::join!(handle.register_table(enterprise(&[5, 1]), spec), async {
            let (header, _) = master.recv().await.unwrap();
            master.respond(&header, ErrorStatus::NoError, 0, Vec::new()).await;
            let (header, _) = master.recv().await.unwrap();
            master.respond(&header, ErrorStatus::RequestDenied, 0, Vec::new()).await;

            let (header, pdu) = master.recv().await.unwrap();
            let Pdu::Unregister { subtree, .. } = pdu else {
                panic!("expected Unregister, got {pdu:?}");
            };
            assert_eq!(subtree, enterprise(&[5, 1]));
            master
                .respond(&header, ErrorStatus::UnknownRegistration, 0, Vec::new())
                .await;
        });

        assert!(matches!(
            result,
            Err(Error::Registration {
                status: ErrorStatus::RequestDenied,
                ..
            })
        ));
        assert!(handle.registry().is_empty());
    }

    #[tokio::test]
    async fn test_notify_prepends_trap_oid() {
        let (mut session, mut listener) = session();
        let handle = session.handle();
        let mut master = open(&mut session, &mut listener, 0).await;

        let trap = enterprise(&[0, 1]);
        handle
            .notify(
                trap.clone(),
                vec![VarBind::new(enterprise(&[1, 0]), Value::Integer(3))],
            )
            .await
            .unwrap();

        let (header, pdu) = master.recv().await.unwrap();
        assert_eq!(header.pdu_type, PduType::Notify);
        let Pdu::Notify { varbinds, .. } = pdu else {
            panic!("expected Notify");
        };
        assert_eq!(
            varbinds,
            vec![
                VarBind::new(Oid::from_slice(&SNMP_TRAP_OID), Value::ObjectIdentifier(trap)),
                VarBind::new(enterprise(&[1, 0]), Value::Integer(3)),
            ]
        );
    }

    #[tokio::test]
    async fn test_notify_requires_open_session() {
        let (session, _listener) = session();
        let result = session.notify(enterprise(&[0, 1]), Vec::new()).await;
        assert!(matches!(result, Err(Error::NotOpen)));
    }

    #[tokio::test]
    async fn test_ping() {
        let (mut session, mut listener) = session();
        let handle = session.handle();
        let mut master = open(&mut session, &mut listener, 0).await;

        let (result, ()) = tokio::join!(handle.ping(), async {
            let (header, pdu) = master.recv().await.unwrap();
            assert_eq!(pdu, Pdu::Ping { context: None });
            master.respond(&header, ErrorStatus::NoError, 0, Vec::new()).await;
        });
        result.unwrap();
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let (mut session, mut listener) = session();
        let handle = session.handle();
        let _master = open(&mut session, &mut listener, 0).await;

        let err = handle.ping().await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(handle.is_open());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Open.to_string(), "open");
        assert_eq!(SessionState::Disconnected.to_string(), "disconnected");
    }
}
