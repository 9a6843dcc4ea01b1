// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard that removes a connection from the registry
//! however its handler exits.

use super::session::{ChannelKind, PeerRole};
use crate::core::metrics;
use crate::core::registry::HostRelease;
use crate::core::state::RelayState;
use crate::core::SessionId;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Runs the role-specific registry cleanup when a connection handler's scope is exited.
pub struct ConnectionGuard {
    /// A shared reference to the relay state.
    pub(crate) state: Arc<RelayState>,
    /// The session id of the connection being guarded.
    pub(crate) session_id: SessionId,
    /// The network address of the peer.
    pub(crate) addr: SocketAddr,
    pub(crate) channel: ChannelKind,
    /// Decides which cleanup runs. `None` until the peer's role is known, in which case
    /// there is nothing in the registry to remove.
    pub(crate) role: Option<PeerRole>,
}

impl ConnectionGuard {
    /// Creates a new `ConnectionGuard` and counts the connection as open.
    pub(crate) fn new(
        state: Arc<RelayState>,
        session_id: SessionId,
        addr: SocketAddr,
        channel: ChannelKind,
        role: Option<PeerRole>,
    ) -> Self {
        metrics::CONNECTED_PEERS
            .with_label_values(&[channel.as_str()])
            .inc();
        Self {
            state,
            session_id,
            addr,
            channel,
            role,
        }
    }

    /// Records the role a shared-port connection announced in its hello.
    pub(crate) fn set_role(&mut self, role: PeerRole) {
        self.role = Some(role);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        metrics::CONNECTED_PEERS
            .with_label_values(&[self.channel.as_str()])
            .dec();
        debug!(
            "ConnectionGuard dropping, cleaning up session ({}) for connection {}",
            self.session_id, self.addr
        );

        let registry = &self.state.registry;
        match self.role {
            Some(PeerRole::Client) => {
                if registry.release_client(self.session_id).is_none() {
                    debug!(
                        "Client with session-ID ({}) held no assignment upon cleanup.",
                        self.session_id
                    );
                }
            }
            Some(PeerRole::HostProcess) => {
                if let HostRelease::NotRegistered = registry.release_host(self.session_id) {
                    debug!(
                        "Host-process with session-ID ({}) was not in the registry upon cleanup.",
                        self.session_id
                    );
                }
            }
            Some(PeerRole::Command) => {
                if registry.clear_command_channel(self.session_id) {
                    metrics::COMMAND_CHANNEL_CONNECTED.set(0.0);
                    tracing::info!("Host-process command channel has disconnected.");
                } else {
                    debug!(
                        "Command channel ({}) had already been replaced.",
                        self.session_id
                    );
                }
            }
            None => {}
        }
    }
}
