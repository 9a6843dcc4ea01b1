// src/endpoint/client.rs

//! A client's connection through the relay.

use super::{connect_with_timeout, read_reply};
use crate::core::RelayError;
use crate::core::protocol::{ClientHelloResponse, Hello, MessageCodec};
use bytes::{Bytes, BytesMut};
use futures::SinkExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::{debug, info};

/// A client that has been paired with a host-process. Everything written goes to it raw.
#[derive(Debug)]
pub struct ClientEndpoint {
    stream: TcpStream,
    read_buf: BytesMut,
}

impl ClientEndpoint {
    /// Connects to the relay's client port and asks for a host-process.
    ///
    /// Returns `Ok(None)` when the relay has no host-process to offer; the relay closes the
    /// connection in that case.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Option<Self>, RelayError> {
        let stream = connect_with_timeout(addr).await?;
        let mut framed = Framed::new(stream, MessageCodec::<ClientHelloResponse>::new());
        framed.send(Hello::client()).await?;

        let response = read_reply(&mut framed).await?;
        if !response.assigned {
            info!("The relay has no host-process available for us.");
            return Ok(None);
        }
        debug!("Assigned to a host-process; switching to raw mode.");

        let parts = framed.into_parts();
        Ok(Some(Self {
            stream: parts.io,
            read_buf: parts.read_buf,
        }))
    }

    /// Sends bytes to the host-process.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), RelayError> {
        self.stream.write_all(data).await?;
        Ok(())
    }

    /// Receives the next chunk from the host-process, or `None` once the relay closes.
    pub async fn recv(&mut self) -> Result<Option<Bytes>, RelayError> {
        if self.read_buf.is_empty() && self.stream.read_buf(&mut self.read_buf).await? == 0 {
            return Ok(None);
        }
        Ok(Some(self.read_buf.split().freeze()))
    }

    /// The raw stream and any bytes already read past the handshake.
    pub fn into_parts(self) -> (TcpStream, BytesMut) {
        (self.stream, self.read_buf)
    }
}
