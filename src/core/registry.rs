// src/core/registry.rs

//! Implements the `SessionRegistry`, which pairs waiting host-processes with arriving
//! clients and keeps the assignment maps consistent under concurrent connects and drops.
//!
//! Every operation takes the same lock for a short map mutation and nothing else. Effects
//! on other connections (announcements, closes) are collected under the lock and applied
//! after it is released; they are queue pushes onto the target's writer, never socket I/O.
//! An assigned client's hello-response is the exception: it is pushed under the lock so it
//! is queued before the host can see the pairing.

use super::peer::{CommandChannel, PeerHandle, SessionId};
use super::protocol::{ClientHelloResponse, frame_message};
use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why a client could not be assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignDenial {
    /// No host-process controller is listening on the command channel.
    NoCommandChannel,
    /// Every host-process connection is busy or none have said hello.
    NoWaitingHost,
    /// The client session already holds an assignment.
    AlreadyAssigned,
}

impl AssignDenial {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignDenial::NoCommandChannel => "no_command_channel",
            AssignDenial::NoWaitingHost => "no_waiting_host",
            AssignDenial::AlreadyAssigned => "already_assigned",
        }
    }
}

/// What `release_host` found for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRelease {
    /// The session was neither waiting nor assigned.
    NotRegistered,
    /// The session was removed from the waiting queue.
    Waiting,
    /// The session was assigned; its client has been closed.
    Assigned { client_session_id: SessionId },
}

/// A point-in-time copy of the registry's bookkeeping, for metrics and inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Waiting host-process sessions, oldest first.
    pub waiting: Vec<SessionId>,
    /// Host-process sessions that hold an assignment.
    pub assigned_hosts: Vec<SessionId>,
    /// Client sessions that hold an assignment.
    pub clients: Vec<SessionId>,
    /// `(client, host)` pairs from the client-to-host map.
    pub client_to_host: Vec<(SessionId, SessionId)>,
    /// `(host, client)` pairs from the host-to-client map.
    pub host_to_client: Vec<(SessionId, SessionId)>,
    pub command_channel: Option<SessionId>,
}

impl RegistrySnapshot {
    pub fn active_assignments(&self) -> usize {
        self.client_to_host.len()
    }

    /// Checks that both maps are mutual inverses, that the tracking collections mirror
    /// them, and that no session appears in more than one role.
    pub fn is_consistent(&self) -> bool {
        if self.client_to_host.len() != self.host_to_client.len()
            || self.clients.len() != self.client_to_host.len()
            || self.assigned_hosts.len() != self.host_to_client.len()
        {
            return false;
        }

        let reverse: HashMap<SessionId, SessionId> = self.host_to_client.iter().copied().collect();
        let mirrored = self
            .client_to_host
            .iter()
            .all(|(client, host)| reverse.get(host) == Some(client));
        let tracked = self
            .client_to_host
            .iter()
            .all(|(client, host)| self.clients.contains(client) && self.assigned_hosts.contains(host));
        let disjoint = self.waiting.iter().all(|id| {
            !reverse.contains_key(id) && !self.client_to_host.iter().any(|(c, _)| c == id)
        });
        let mut seen = std::collections::HashSet::new();
        let unique = self
            .client_to_host
            .iter()
            .all(|(client, host)| seen.insert(*client) && seen.insert(*host));

        mirrored && tracked && disjoint && unique
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    waiting_hosts: IndexMap<SessionId, PeerHandle>,
    assigned_hosts: IndexMap<SessionId, PeerHandle>,
    clients: IndexMap<SessionId, PeerHandle>,
    client_to_host: HashMap<SessionId, PeerHandle>,
    host_to_client: HashMap<SessionId, PeerHandle>,
    command_channel: Option<CommandChannel>,
}

impl RegistryInner {
    fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            waiting: self.waiting_hosts.keys().copied().collect(),
            assigned_hosts: self.assigned_hosts.keys().copied().collect(),
            clients: self.clients.keys().copied().collect(),
            client_to_host: self
                .client_to_host
                .iter()
                .map(|(client, host)| (*client, host.session_id()))
                .collect(),
            host_to_client: self
                .host_to_client
                .iter()
                .map(|(host, client)| (*host, client.session_id()))
                .collect(),
            command_channel: self.command_channel.as_ref().map(|c| c.session_id()),
        }
    }

    /// Removes both directions of the assignment and both tracking entries.
    fn unlink(&mut self, client_session_id: SessionId, host_session_id: SessionId) {
        self.client_to_host.remove(&client_session_id);
        self.host_to_client.remove(&host_session_id);
        self.clients.shift_remove(&client_session_id);
        self.assigned_hosts.shift_remove(&host_session_id);
    }
}

/// The process-wide assignment manager shared by every connection handler.
#[derive(Debug)]
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
    drop_grace_period: Duration,
}

impl SessionRegistry {
    pub fn new(drop_grace_period: Duration) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            drop_grace_period,
        }
    }

    /// Appends a host-process that completed its hello to the waiting queue.
    /// Returns `false` if the session was already waiting or assigned.
    pub fn queue_waiting_host(&self, host: PeerHandle) -> bool {
        let session_id = host.session_id();
        let mut inner = self.inner.lock();
        if inner.waiting_hosts.contains_key(&session_id)
            || inner.host_to_client.contains_key(&session_id)
        {
            warn!(
                "Host-process with session-ID ({}) said hello twice; ignoring.",
                session_id
            );
            return false;
        }
        inner.waiting_hosts.insert(session_id, host);
        debug!(
            "Host-process with session-ID ({}) queued; {} waiting.",
            session_id,
            inner.waiting_hosts.len()
        );
        true
    }

    /// The host-process currently assigned to a client session.
    pub fn get_assigned_host(&self, client_session_id: SessionId) -> Option<PeerHandle> {
        self.inner.lock().client_to_host.get(&client_session_id).cloned()
    }

    /// The client currently assigned to a host-process session.
    pub fn get_assigned_client(&self, host_session_id: SessionId) -> Option<PeerHandle> {
        self.inner.lock().host_to_client.get(&host_session_id).cloned()
    }

    /// Pairs `client` with the oldest waiting host-process.
    ///
    /// Returns `false` without touching any state when no command channel is connected or
    /// no host-process is waiting. On success the client's positive hello-response is queued
    /// and the assignment is announced on the command channel; the two may reach their peers
    /// in either order.
    pub fn assign_client(&self, client: &PeerHandle) -> bool {
        match frame_message(&ClientHelloResponse { assigned: true }) {
            Ok(accepted) => self.try_assign_client(client, accepted).is_ok(),
            Err(e) => {
                warn!("Could not frame the client hello-response: {}", e);
                false
            }
        }
    }

    /// Like `assign_client`, but reports which host was chosen or why none was.
    ///
    /// `accepted` is the framed positive hello-response. It is queued on the client while
    /// the pairing is made, so it is on the client's writer before the host can forward
    /// anything to it.
    pub fn try_assign_client(
        &self,
        client: &PeerHandle,
        accepted: Bytes,
    ) -> Result<PeerHandle, AssignDenial> {
        let client_session_id = client.session_id();
        let (host, command_channel) = {
            let mut inner = self.inner.lock();

            let Some(command_channel) = inner.command_channel.clone() else {
                info!(
                    "Denying client with session-ID ({}): no host-process command channel is connected.",
                    client_session_id
                );
                return Err(AssignDenial::NoCommandChannel);
            };

            if inner.client_to_host.contains_key(&client_session_id) {
                warn!(
                    "Client with session-ID ({}) is already assigned.",
                    client_session_id
                );
                return Err(AssignDenial::AlreadyAssigned);
            }

            let Some((host_session_id, host)) = inner.waiting_hosts.shift_remove_index(0) else {
                info!(
                    "Denying client with session-ID ({}): no host-processes are available.",
                    client_session_id
                );
                return Err(AssignDenial::NoWaitingHost);
            };

            if !client.send(accepted) {
                debug!(
                    "Client with session-ID ({}) closed before its hello-response was queued.",
                    client_session_id
                );
            }
            inner.client_to_host.insert(client_session_id, host.clone());
            inner.host_to_client.insert(host_session_id, client.clone());
            inner.assigned_hosts.insert(host_session_id, host.clone());
            inner.clients.insert(client_session_id, client.clone());

            (host, command_channel)
        };

        info!(
            "Client with session-ID ({}) has been assigned to host-process with session-ID ({}).",
            client_session_id,
            host.session_id()
        );
        command_channel.announce_assignment(host.session_id());
        Ok(host)
    }

    /// Tears down the assignment held by a client session, if any.
    ///
    /// The paired host-process is closed after the grace period rather than immediately,
    /// and the drop is announced on the command channel if one is connected. Returns the
    /// released host session, or `None` if the client held no assignment.
    pub fn release_client(&self, client_session_id: SessionId) -> Option<SessionId> {
        let (host, command_channel) = {
            let mut inner = self.inner.lock();
            let host = inner.client_to_host.get(&client_session_id).cloned()?;
            inner.unlink(client_session_id, host.session_id());
            (host, inner.command_channel.clone())
        };

        info!(
            "Client with session-ID ({}) mapped to host-process with session-ID ({}) has dropped.",
            client_session_id,
            host.session_id()
        );
        if let Some(channel) = command_channel {
            channel.announce_drop(host.session_id());
        }
        host.close_after(self.drop_grace_period);
        Some(host.session_id())
    }

    /// Removes a host-process session from the registry.
    ///
    /// A waiting host is simply dequeued. An assigned host takes its client down with it
    /// immediately; the client is not re-homed onto another waiting host.
    pub fn release_host(&self, host_session_id: SessionId) -> HostRelease {
        let client = {
            let mut inner = self.inner.lock();
            if inner.waiting_hosts.shift_remove(&host_session_id).is_some() {
                info!(
                    "Unassigned host-process with session-ID ({}) has dropped.",
                    host_session_id
                );
                return HostRelease::Waiting;
            }
            let Some(client) = inner.host_to_client.get(&host_session_id).cloned() else {
                return HostRelease::NotRegistered;
            };
            inner.unlink(client.session_id(), host_session_id);
            client
        };

        info!(
            "Host-process with session-ID ({}) mapped to client with session-ID ({}) has dropped.",
            host_session_id,
            client.session_id()
        );
        client.close();
        HostRelease::Assigned {
            client_session_id: client.session_id(),
        }
    }

    /// Installs a new command channel, returning the one it replaced.
    pub fn set_command_channel(&self, channel: CommandChannel) -> Option<CommandChannel> {
        self.inner.lock().command_channel.replace(channel)
    }

    /// Clears the command channel if it still belongs to `session_id`.
    /// A replaced channel that disconnects later leaves its successor in place.
    pub fn clear_command_channel(&self, session_id: SessionId) -> bool {
        let mut inner = self.inner.lock();
        match &inner.command_channel {
            Some(current) if current.session_id() == session_id => {
                inner.command_channel = None;
                true
            }
            _ => false,
        }
    }

    pub fn has_command_channel(&self) -> bool {
        self.inner.lock().command_channel.is_some()
    }

    /// True while the host-process session sits in the waiting queue.
    pub fn is_waiting(&self, host_session_id: SessionId) -> bool {
        self.inner.lock().waiting_hosts.contains_key(&host_session_id)
    }

    pub fn waiting_len(&self) -> usize {
        self.inner.lock().waiting_hosts.len()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.inner.lock().snapshot()
    }
}
