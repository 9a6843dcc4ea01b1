// src/core/peer.rs

//! Defines `PeerHandle`, the registry's reference to a live connection, and the writer task
//! that owns each connection's write half.
//!
//! A handle never touches the socket directly. Everything it does is an enqueue onto the
//! connection's outbound queue, so it is safe to use from inside or right after a registry
//! call and from any task. Sends to a connection that already closed are dropped.

use super::protocol::{Command, RelayMessage, frame_message};
use crate::core::RelayError;
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info};

/// A relay-assigned identifier, unique across every listener for the life of the process.
pub type SessionId = u64;

/// Work queued for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    /// Raw bytes (or an already framed message) to write verbatim.
    Data(Bytes),
    /// Flush everything queued so far, then close.
    Close,
    /// Keep writing queued data, but close once the delay has passed.
    CloseAfter(Duration),
}

/// A cheap, clonable reference to one connection.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    session_id: SessionId,
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl PeerHandle {
    /// Creates a handle and the receiving end its writer task should drain.
    pub fn new(session_id: SessionId, addr: SocketAddr) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                session_id,
                addr,
                tx,
            },
            rx,
        )
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queues raw bytes. Returns `false` if the connection's writer is gone.
    pub fn send(&self, data: Bytes) -> bool {
        self.tx.send(Outbound::Data(data)).is_ok()
    }

    /// Frames and queues a handshake message.
    pub fn send_message<M: RelayMessage>(&self, message: &M) -> Result<bool, RelayError> {
        Ok(self.send(frame_message(message)?))
    }

    /// Closes the connection once everything already queued has been written.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    /// Schedules a close after `grace`, letting in-flight writes land first.
    pub fn close_after(&self, grace: Duration) {
        let _ = self.tx.send(Outbound::CloseAfter(grace));
    }

    /// True once the writer task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PartialEq for PeerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.session_id == other.session_id
    }
}

impl Eq for PeerHandle {}

/// The relay's side of the single command-channel connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandChannel {
    peer: PeerHandle,
}

impl CommandChannel {
    pub fn new(peer: PeerHandle) -> Self {
        Self { peer }
    }

    pub fn session_id(&self) -> SessionId {
        self.peer.session_id()
    }

    /// Announces that a client was assigned to `host_session_id`.
    pub fn announce_assignment(&self, host_session_id: SessionId) {
        info!(
            "Announcing assignment of new client to host-process session ({}).",
            host_session_id
        );
        self.announce(&Command::connection_open(host_session_id));
    }

    /// Announces that the client assigned to `host_session_id` dropped.
    pub fn announce_drop(&self, host_session_id: SessionId) {
        info!(
            "Announcing drop of client assigned to host-process session ({}).",
            host_session_id
        );
        self.announce(&Command::connection_drop(host_session_id));
    }

    fn announce(&self, command: &Command) {
        match self.peer.send_message(command) {
            Ok(true) => {}
            Ok(false) => debug!(
                "Command channel ({}) closed before {:?} could be queued.",
                self.peer.session_id(),
                command.message_type
            ),
            Err(e) => debug!("Failed to frame {:?}: {}", command.message_type, e),
        }
    }
}

/// Drains `rx` into `writer` until told to close, the peer goes away, or every handle drops.
///
/// On exit the write half is shut down and `closed_tx` fires so the connection's reader
/// stops as well.
pub async fn run_writer<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    session_id: SessionId,
    closed_tx: broadcast::Sender<()>,
) where
    W: AsyncWrite + Unpin,
{
    let mut deadline: Option<Instant> = None;

    loop {
        let grace_expired = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = grace_expired => {
                debug!("Session {}: grace period expired, closing.", session_id);
                break;
            }
            outbound = rx.recv() => match outbound {
                Some(Outbound::Data(data)) => {
                    if let Err(e) = writer.write_all(&data).await {
                        debug!("Session {}: write failed: {}", session_id, e);
                        break;
                    }
                }
                Some(Outbound::Close) => {
                    debug!("Session {}: close requested.", session_id);
                    break;
                }
                Some(Outbound::CloseAfter(grace)) => {
                    let at = Instant::now() + grace;
                    deadline = Some(deadline.map_or(at, |current| current.min(at)));
                    debug!("Session {}: close scheduled in {:?}.", session_id, grace);
                }
                None => break,
            }
        }
    }

    let _ = writer.flush().await;
    let _ = writer.shutdown().await;
    let _ = closed_tx.send(());
}
