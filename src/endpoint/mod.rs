// src/endpoint/mod.rs

//! The peer side of the relay: what host-processes and clients run to reach each other
//! through it.
//!
//! - `HostProcessEndpoint` parks a data connection at the relay and serves whatever client
//!   is paired with it through a `PayloadHandler`.
//! - `ClientEndpoint` asks the relay for a host-process and, if one is assigned, hands back
//!   the raw stream.
//! - `CommandListener` follows the relay's assignment announcements.
//! - `agent::run` ties these together for `--host-process` mode.

pub mod agent;
pub mod client;
pub mod command_listener;
pub mod handler;
pub mod host_process;

pub use client::ClientEndpoint;
pub use command_listener::{Announcement, CommandListener};
pub use handler::{EchoHandler, LoggingHandler, PayloadHandler, handler_for};
pub use host_process::HostProcessEndpoint;

use crate::core::RelayError;
use futures::StreamExt;
use std::io;
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Decoder, Framed};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens a TCP connection to the relay, giving up after `CONNECT_TIMEOUT`.
pub(crate) async fn connect_with_timeout<A: ToSocketAddrs>(addr: A) -> Result<TcpStream, RelayError> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            io::Error::new(io::ErrorKind::TimedOut, "timed out connecting to the relay")
        })??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Waits for the relay's single handshake reply on a framed connection.
pub(crate) async fn read_reply<C>(framed: &mut Framed<TcpStream, C>) -> Result<C::Item, RelayError>
where
    C: Decoder<Error = RelayError>,
{
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next()).await {
        Err(_) => Err(RelayError::HandshakeTimeout(HANDSHAKE_TIMEOUT)),
        Ok(Some(reply)) => reply,
        Ok(None) => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "relay closed the connection during the handshake",
        )
        .into()),
    }
}
