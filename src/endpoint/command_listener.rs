// src/endpoint/command_listener.rs

//! Follows the relay's command channel.

use super::connect_with_timeout;
use crate::core::RelayError;
use crate::core::protocol::{Command, CommandType, MessageCodec};
use futures::{Stream, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::{debug, info};

/// An event announced on the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Announcement {
    /// A client has been paired with the host-process connection `host_session_id`.
    ConnectionOpen { host_session_id: u64 },
    /// The client paired with `host_session_id` dropped; that connection closes shortly.
    ConnectionDrop { host_session_id: u64 },
}

impl Announcement {
    pub fn host_session_id(&self) -> u64 {
        match self {
            Announcement::ConnectionOpen { host_session_id }
            | Announcement::ConnectionDrop { host_session_id } => *host_session_id,
        }
    }
}

impl TryFrom<Command> for Announcement {
    type Error = RelayError;

    fn try_from(command: Command) -> Result<Self, Self::Error> {
        let missing = || RelayError::ProtocolViolation("command is missing required field".into());
        let host_session_id = command.host_session_id().ok_or_else(missing)?;
        Ok(match command.message_type {
            CommandType::ConnectionOpen => Announcement::ConnectionOpen { host_session_id },
            CommandType::ConnectionDrop => Announcement::ConnectionDrop { host_session_id },
        })
    }
}

/// A connection to the relay's command port.
#[derive(Debug)]
pub struct CommandListener {
    framed: Framed<TcpStream, MessageCodec<Command>>,
}

impl CommandListener {
    /// Connects to the command port. There is no handshake on this channel.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, RelayError> {
        let stream = connect_with_timeout(addr).await?;
        info!("Connected command-listener.");
        Ok(Self {
            framed: Framed::new(stream, MessageCodec::new()),
        })
    }

    /// Waits for the next announcement, or `None` once the relay closes the channel.
    pub async fn next_announcement(&mut self) -> Result<Option<Announcement>, RelayError> {
        match self.framed.next().await {
            Some(command) => {
                let announcement = Announcement::try_from(command?)?;
                debug!("Received announcement {:?}.", announcement);
                Ok(Some(announcement))
            }
            None => Ok(None),
        }
    }

    /// Turns the listener into a stream of announcements.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Announcement, RelayError>> {
        async_stream::try_stream! {
            while let Some(announcement) = self.next_announcement().await? {
                yield announcement;
            }
        }
    }
}
