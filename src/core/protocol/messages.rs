// src/core/protocol/messages.rs

//! Defines the handshake and command-channel messages exchanged with the relay.
//!
//! Payloads are encoded with `bincode`'s standard configuration. Only the logical fields
//! matter to the relay; each message validates its required fields after decoding.

use crate::core::RelayError;
use bincode::config;
use bytes::Bytes;

/// The only protocol version this relay speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// A message that can travel inside a handshake or command-channel frame.
pub trait RelayMessage: bincode::Encode + bincode::Decode<()> + Sized {
    /// A human-readable name used in logs and errors.
    const NAME: &'static str;

    /// Checks that a decoded message carries everything its type requires.
    fn validate(&self) -> Result<(), RelayError> {
        Ok(())
    }

    /// Serializes the message payload (without the length prefix).
    fn to_bytes(&self) -> Result<Bytes, RelayError> {
        bincode::encode_to_vec(self, config::standard())
            .map(Bytes::from)
            .map_err(|e| RelayError::Encode {
                message: Self::NAME,
                reason: e.to_string(),
            })
    }

    /// Decodes and validates a payload. The whole slice must be consumed.
    fn from_bytes(payload: &[u8]) -> Result<Self, RelayError> {
        let (message, read): (Self, usize) =
            bincode::decode_from_slice(payload, config::standard()).map_err(|e| {
                RelayError::Decode {
                    message: Self::NAME,
                    reason: e.to_string(),
                }
            })?;
        if read != payload.len() {
            return Err(RelayError::Decode {
                message: Self::NAME,
                reason: format!("{} trailing bytes after message", payload.len() - read),
            });
        }
        message.validate()?;
        Ok(message)
    }
}

/// Which side of the relay a data-channel peer is on.
#[derive(bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerType {
    Client,
    HostProcess,
}

/// The first message on every data-channel connection.
#[derive(bincode::Encode, bincode::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub version: u32,
    pub peer_type: PeerType,
}

impl Hello {
    pub fn client() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            peer_type: PeerType::Client,
        }
    }

    pub fn host_process() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            peer_type: PeerType::HostProcess,
        }
    }
}

impl RelayMessage for Hello {
    const NAME: &'static str = "Hello";

    fn validate(&self) -> Result<(), RelayError> {
        if self.version != PROTOCOL_VERSION {
            return Err(RelayError::ProtocolViolation(format!(
                "unsupported hello version {}",
                self.version
            )));
        }
        Ok(())
    }
}

/// Tells a client whether it was paired with a host-process.
#[derive(bincode::Encode, bincode::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloResponse {
    pub assigned: bool,
}

impl RelayMessage for ClientHelloResponse {
    const NAME: &'static str = "ClientHelloResponse";
}

/// Sent to a host-process once it is queued: its session id and the address clients use.
#[derive(bincode::Encode, bincode::Decode, Debug, Clone, PartialEq, Eq)]
pub struct HostProcessHelloResponse {
    pub session_id: u64,
    pub relay_host: String,
    pub relay_port: String,
}

impl RelayMessage for HostProcessHelloResponse {
    const NAME: &'static str = "HostProcessHelloResponse";

    fn validate(&self) -> Result<(), RelayError> {
        if self.relay_host.is_empty() || self.relay_port.is_empty() {
            return Err(RelayError::ProtocolViolation(
                "host-process hello response is missing the relay address".to_string(),
            ));
        }
        Ok(())
    }
}

/// The kind of event a `Command` announces.
#[derive(bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    ConnectionOpen,
    ConnectionDrop,
}

#[derive(bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenProperties {
    /// The host-process session a new client was assigned to.
    pub assigned_to_session: u64,
}

#[derive(bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropProperties {
    /// The host-process session whose client went away.
    pub session_id: u64,
}

/// A relay-to-controller announcement on the command channel.
#[derive(bincode::Encode, bincode::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub version: u32,
    pub message_type: CommandType,
    pub open_properties: Option<OpenProperties>,
    pub drop_properties: Option<DropProperties>,
}

impl Command {
    pub fn connection_open(host_session_id: u64) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message_type: CommandType::ConnectionOpen,
            open_properties: Some(OpenProperties {
                assigned_to_session: host_session_id,
            }),
            drop_properties: None,
        }
    }

    pub fn connection_drop(host_session_id: u64) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message_type: CommandType::ConnectionDrop,
            open_properties: None,
            drop_properties: Some(DropProperties {
                session_id: host_session_id,
            }),
        }
    }

    /// The host-process session this command refers to.
    pub fn host_session_id(&self) -> Option<u64> {
        match self.message_type {
            CommandType::ConnectionOpen => self.open_properties.map(|p| p.assigned_to_session),
            CommandType::ConnectionDrop => self.drop_properties.map(|p| p.session_id),
        }
    }
}

impl RelayMessage for Command {
    const NAME: &'static str = "Command";

    fn validate(&self) -> Result<(), RelayError> {
        if self.host_session_id().is_none() {
            return Err(RelayError::ProtocolViolation(format!(
                "{:?} command is missing its properties",
                self.message_type
            )));
        }
        Ok(())
    }
}
