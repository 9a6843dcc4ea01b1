// src/connection/session.rs

//! Defines the state associated with a single relay connection.

use std::fmt;

/// The listener a connection arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// The host-process data channel (split mode).
    HostProcess,
    /// The client data channel (split mode).
    Client,
    /// The command channel.
    Command,
    /// The shared data channel (shared mode); the peer's hello decides its role.
    SharedData,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::HostProcess => "host_process",
            ChannelKind::Client => "client",
            ChannelKind::Command => "command",
            ChannelKind::SharedData => "data",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a connection turned out to be, which decides how it is cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Client,
    HostProcess,
    Command,
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Accepted; nothing decided yet.
    Connected,
    /// Accumulating bytes until a full hello frame arrives.
    AwaitingHello,
    /// A host-process that is queued and has no client yet.
    Waiting,
    /// Paired; bytes are forwarded unframed.
    Proxying,
    /// A client that was refused an assignment.
    Denied,
    /// The peer's pairing ended; remaining bytes are discarded until the socket closes.
    Draining,
}

/// Holds the state specific to a single connection.
#[derive(Debug)]
pub struct SessionState {
    pub channel: ChannelKind,
    pub role: Option<PeerRole>,
    pub phase: ConnectionPhase,
}

impl SessionState {
    pub(crate) fn new(channel: ChannelKind) -> Self {
        let role = match channel {
            ChannelKind::HostProcess => Some(PeerRole::HostProcess),
            ChannelKind::Client => Some(PeerRole::Client),
            ChannelKind::Command => Some(PeerRole::Command),
            ChannelKind::SharedData => None,
        };
        Self {
            channel,
            role,
            phase: ConnectionPhase::Connected,
        }
    }
}
