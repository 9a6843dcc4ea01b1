// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a relay connection.
//!
//! Each accepted socket is split in two. The write half is owned by a writer task fed
//! through the connection's `PeerHandle`; the read half stays with the handler, which runs
//! the per-channel state machine and forwards raw bytes to the paired peer's handle.

use super::guard::ConnectionGuard;
use super::session::{ChannelKind, ConnectionPhase, PeerRole, SessionState};
use crate::core::metrics;
use crate::core::peer::run_writer;
use crate::core::protocol::{
    ClientHelloResponse, Hello, HostProcessHelloResponse, PeerType, frame_message, read_message,
    read_typed,
};
use crate::core::{CommandChannel, PeerHandle, RelayError, RelayState, SessionId};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Spare room kept in the read buffer before each read.
const READ_CHUNK: usize = 8 * 1024;

/// How long a denied client gets to deliver its hello before it is closed anyway.
const DENIED_HELLO_WAIT: Duration = Duration::from_secs(1);

/// Why a wait for more bytes ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadEvent {
    /// New bytes were appended to the read buffer.
    Data,
    /// The peer closed its side.
    Eof,
    /// Our own writer exited, either on request or after a failed write.
    WriterClosed,
    /// The relay is shutting down.
    Shutdown,
}

/// Manages the full lifecycle of a relay connection.
pub struct ConnectionHandler {
    reader: OwnedReadHalf,
    read_buf: BytesMut,
    addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    state: Arc<RelayState>,
    session_id: SessionId,
    peer: PeerHandle,
    writer_task: JoinHandle<()>,
    closed_rx: broadcast::Receiver<()>,
    shutdown_rx: broadcast::Receiver<()>,
    session: SessionState,
}

impl ConnectionHandler {
    /// Splits the socket and starts its writer task. Must be called inside a Tokio runtime.
    pub fn new(
        socket: TcpStream,
        addr: SocketAddr,
        state: Arc<RelayState>,
        session_id: SessionId,
        channel: ChannelKind,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        if let Err(e) = socket.set_nodelay(true) {
            debug!("Session {}: failed to set TCP_NODELAY: {}", session_id, e);
        }
        let local_addr = socket.local_addr().ok();
        let (reader, writer) = socket.into_split();
        let (peer, outbound_rx) = PeerHandle::new(session_id, addr);
        let (closed_tx, closed_rx) = broadcast::channel(1);
        let writer_task = tokio::spawn(run_writer(writer, outbound_rx, session_id, closed_tx));

        Self {
            reader,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            addr,
            local_addr,
            state,
            session_id,
            peer,
            writer_task,
            closed_rx,
            shutdown_rx,
            session: SessionState::new(channel),
        }
    }

    /// Runs the channel's state machine until either side closes, then releases the
    /// connection from the registry and waits for the writer to drain.
    pub async fn run(mut self) -> Result<(), RelayError> {
        let mut guard = ConnectionGuard::new(
            self.state.clone(),
            self.session_id,
            self.addr,
            self.session.channel,
            self.session.role,
        );

        let result = match self.session.channel {
            ChannelKind::HostProcess => self.run_host_process().await,
            ChannelKind::Client => self.run_client().await,
            ChannelKind::Command => self.run_command().await,
            ChannelKind::SharedData => self.run_shared(&mut guard).await,
        };

        if let Err(e) = &result {
            if e.is_protocol_error() {
                metrics::PROTOCOL_ERRORS_TOTAL.inc();
            }
            if e.is_normal_disconnect() {
                debug!("Connection from {} closed by peer: {}", self.addr, e);
            } else {
                warn!(
                    "Closing {} connection from {} (session {}): {}",
                    self.session.channel, self.addr, self.session_id, e
                );
            }
        }
        debug!(
            "Session {} ended in phase {:?}.",
            self.session_id, self.session.phase
        );

        drop(guard);
        self.peer.close();
        if let Err(e) = self.writer_task.await
            && e.is_panic()
        {
            warn!("Writer for session {} panicked: {e:?}", self.session_id);
        }

        match result {
            Err(e) if e.is_normal_disconnect() => Ok(()),
            other => other,
        }
    }

    /// Client data channel: answer immediately, then consume the client's own hello and proxy.
    async fn run_client(&mut self) -> Result<(), RelayError> {
        let assigned = self.request_assignment()?;

        let handshake_timeout = self.state.config.session.handshake_timeout;
        let hello = if assigned {
            self.read_hello_within(handshake_timeout).await
        } else {
            self.read_hello_within(handshake_timeout.min(DENIED_HELLO_WAIT))
                .await
        };
        if !assigned {
            // The hello is read only so the socket has nothing unread when it is closed.
            if let Err(e) = hello {
                debug!(
                    "Denied client with session-ID ({}) sent no valid hello: {}",
                    self.session_id, e
                );
            }
            return Ok(());
        }

        let Some(hello) = hello? else {
            return Ok(());
        };
        self.expect_peer_type(&hello, PeerType::Client)?;
        self.proxy_client().await
    }

    /// Host-process data channel: wait for the hello, queue, then proxy.
    async fn run_host_process(&mut self) -> Result<(), RelayError> {
        let Some(hello) = self.read_hello().await? else {
            return Ok(());
        };
        self.expect_peer_type(&hello, PeerType::HostProcess)?;
        self.enter_waiting()?;
        self.proxy_host().await
    }

    /// Shared data channel: the hello decides which of the two data-channel roles this is.
    async fn run_shared(&mut self, guard: &mut ConnectionGuard) -> Result<(), RelayError> {
        let Some(hello) = self.read_hello().await? else {
            return Ok(());
        };

        match hello.peer_type {
            PeerType::HostProcess => {
                self.session.role = Some(PeerRole::HostProcess);
                guard.set_role(PeerRole::HostProcess);
                self.enter_waiting()?;
                self.proxy_host().await
            }
            PeerType::Client => {
                self.session.role = Some(PeerRole::Client);
                guard.set_role(PeerRole::Client);
                let assigned = self.request_assignment()?;
                if !assigned {
                    return Ok(());
                }
                self.proxy_client().await
            }
        }
    }

    /// Command channel: become the process-wide announcement target and ignore all input.
    async fn run_command(&mut self) -> Result<(), RelayError> {
        let channel = CommandChannel::new(self.peer.clone());
        if let Some(previous) = self.state.registry.set_command_channel(channel) {
            warn!(
                "Command channel ({}) replaced by session ({}); the old connection is left open.",
                previous.session_id(),
                self.session_id
            );
        }
        metrics::COMMAND_CHANNEL_CONNECTED.set(1.0);
        info!("Host-process command channel connected from {}.", self.addr);

        let max_frame_len = self.state.config.session.max_frame_len;
        loop {
            while let Some(frame) = read_message(&mut self.read_buf, max_frame_len)? {
                debug!(
                    "Ignoring ({}) byte frame on command channel ({}).",
                    frame.len(),
                    self.session_id
                );
            }
            if self.read_more().await? != ReadEvent::Data {
                return Ok(());
            }
        }
    }

    /// Asks the registry for a host-process, records the outcome, and makes sure the
    /// client's hello-response is queued either way.
    fn request_assignment(&mut self) -> Result<bool, RelayError> {
        let accepted = frame_message(&ClientHelloResponse { assigned: true })?;
        match self.state.registry.try_assign_client(&self.peer, accepted) {
            Ok(host) => {
                metrics::ASSIGNMENTS_TOTAL.inc();
                debug!(
                    "Client ({}) at {} paired with host-process ({}) at {}.",
                    self.session_id,
                    self.addr,
                    host.session_id(),
                    host.addr()
                );
                self.session.phase = ConnectionPhase::Proxying;
                Ok(true)
            }
            Err(denial) => {
                metrics::ASSIGNMENTS_DENIED_TOTAL
                    .with_label_values(&[denial.as_str()])
                    .inc();
                self.session.phase = ConnectionPhase::Denied;
                self.peer
                    .send_message(&ClientHelloResponse { assigned: false })?;
                Ok(false)
            }
        }
    }

    /// Replies to a host-process hello and joins the waiting queue.
    ///
    /// The response is queued before the host becomes assignable, so it is always the first
    /// thing on the wire ahead of any forwarded client bytes.
    fn enter_waiting(&mut self) -> Result<(), RelayError> {
        let response = HostProcessHelloResponse {
            session_id: self.session_id,
            relay_host: self.announced_host(),
            relay_port: self.state.announced_port().to_string(),
        };
        self.peer.send_message(&response)?;

        if !self.state.registry.queue_waiting_host(self.peer.clone()) {
            return Err(RelayError::ProtocolViolation(
                "host-process said hello twice".to_string(),
            ));
        }
        self.session.phase = ConnectionPhase::Waiting;
        info!(
            "Host-process with session-ID ({}) from {} is waiting for a client.",
            self.session_id, self.addr
        );
        Ok(())
    }

    /// Client side of the splice. Ends when the client closes or loses its host.
    async fn proxy_client(&mut self) -> Result<(), RelayError> {
        self.session.phase = ConnectionPhase::Proxying;
        loop {
            if !self.read_buf.is_empty() {
                let Some(host) = self.state.registry.get_assigned_host(self.session_id) else {
                    debug!(
                        "Client ({}) no longer has a host-process; dropping ({}) bytes.",
                        self.session_id,
                        self.read_buf.len()
                    );
                    self.session.phase = ConnectionPhase::Draining;
                    return Ok(());
                };
                self.forward_to(&host, "client_to_host");
            }
            if self.read_more().await? != ReadEvent::Data {
                return Ok(());
            }
        }
    }

    /// Host side of the splice. Bytes sent before a client arrives are held back and go out
    /// ahead of the next chunk once a client is paired.
    async fn proxy_host(&mut self) -> Result<(), RelayError> {
        let max_pending_bytes = self.state.config.session.max_pending_bytes;
        loop {
            if !self.read_buf.is_empty() {
                // Checked before the assignment lookup so a pairing in between is not missed.
                if self.state.registry.is_waiting(self.session_id) {
                    if self.read_buf.len() > max_pending_bytes {
                        return Err(RelayError::ProtocolViolation(format!(
                            "waiting host-process buffered {} bytes, over the {} byte limit",
                            self.read_buf.len(),
                            max_pending_bytes
                        )));
                    }
                } else if let Some(client) = self.state.registry.get_assigned_client(self.session_id) {
                    self.session.phase = ConnectionPhase::Proxying;
                    self.forward_to(&client, "host_to_client");
                } else {
                    // The client dropped; the writer closes us after the grace period.
                    self.session.phase = ConnectionPhase::Draining;
                    self.read_buf.clear();
                }
            }
            if self.read_more().await? != ReadEvent::Data {
                return Ok(());
            }
        }
    }

    /// Moves everything buffered onto `target`'s writer queue.
    fn forward_to(&mut self, target: &PeerHandle, direction: &'static str) {
        let data = self.read_buf.split().freeze();
        metrics::BYTES_RELAYED_TOTAL
            .with_label_values(&[direction])
            .inc_by(data.len() as f64);
        if !target.send(data) {
            debug!(
                "Session {}: peer ({}) already closed, bytes dropped.",
                self.session_id,
                target.session_id()
            );
        }
    }

    async fn read_hello(&mut self) -> Result<Option<Hello>, RelayError> {
        self.read_hello_within(self.state.config.session.handshake_timeout)
            .await
    }

    /// Accumulates bytes until a whole `Hello` frame has arrived.
    /// Returns `Ok(None)` if the connection ends first.
    async fn read_hello_within(
        &mut self,
        handshake_timeout: Duration,
    ) -> Result<Option<Hello>, RelayError> {
        let max_frame_len = self.state.config.session.max_frame_len;
        let deadline = Instant::now() + handshake_timeout;
        if self.session.phase == ConnectionPhase::Connected {
            self.session.phase = ConnectionPhase::AwaitingHello;
        }

        loop {
            if let Some(hello) = read_typed::<Hello>(&mut self.read_buf, max_frame_len)? {
                debug!(
                    "Session {}: received hello from {:?}.",
                    self.session_id, hello.peer_type
                );
                return Ok(Some(hello));
            }
            match tokio::time::timeout_at(deadline, self.read_more()).await {
                Err(_) => return Err(RelayError::HandshakeTimeout(handshake_timeout)),
                Ok(event) => {
                    if event? != ReadEvent::Data {
                        if !self.read_buf.is_empty() {
                            debug!(
                                "Session {}: closed with ({}) bytes of an unfinished hello.",
                                self.session_id,
                                self.read_buf.len()
                            );
                        }
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Waits for the next read, our own writer closing, or relay shutdown.
    async fn read_more(&mut self) -> Result<ReadEvent, RelayError> {
        self.read_buf.reserve(READ_CHUNK);
        tokio::select! {
            // Prioritize shutdown signals over other events.
            biased;
            _ = self.shutdown_rx.recv() => {
                debug!("Session {}: relay shutting down.", self.session_id);
                Ok(ReadEvent::Shutdown)
            }
            _ = self.closed_rx.recv() => Ok(ReadEvent::WriterClosed),
            res = self.reader.read_buf(&mut self.read_buf) => match res? {
                0 => Ok(ReadEvent::Eof),
                _ => Ok(ReadEvent::Data),
            },
        }
    }

    fn expect_peer_type(&self, hello: &Hello, expected: PeerType) -> Result<(), RelayError> {
        if hello.peer_type == expected {
            Ok(())
        } else {
            Err(RelayError::ProtocolViolation(format!(
                "{:?} hello on the {} channel",
                hello.peer_type, self.session.channel
            )))
        }
    }

    /// `announce.host` if set, otherwise the local address the peer connected to.
    fn announced_host(&self) -> String {
        if let Some(host) = &self.state.config.announce.host {
            return host.clone();
        }
        match self.local_addr {
            Some(addr) if !addr.ip().is_unspecified() => addr.ip().to_string(),
            _ => self.state.config.host.clone(),
        }
    }
}
