// src/endpoint/host_process.rs

//! A host-process's data connection to the relay.

use super::handler::PayloadHandler;
use super::{connect_with_timeout, read_reply};
use crate::core::RelayError;
use crate::core::protocol::{Hello, HostProcessHelloResponse, MessageCodec};
use bytes::BytesMut;
use futures::SinkExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::{debug, info};

/// A data connection that has said hello and is parked at the relay.
#[derive(Debug)]
pub struct HostProcessEndpoint {
    stream: TcpStream,
    /// Raw bytes that arrived behind the hello response.
    read_buf: BytesMut,
    response: HostProcessHelloResponse,
}

impl HostProcessEndpoint {
    /// Connects to the relay's host-process port and completes the handshake.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, RelayError> {
        let stream = connect_with_timeout(addr).await?;
        debug!("Connected to the relay server. Sending hello.");

        let mut framed = Framed::new(stream, MessageCodec::<HostProcessHelloResponse>::new());
        framed.send(Hello::host_process()).await?;
        let response = read_reply(&mut framed).await?;
        info!(
            "Received hello response: SESSION-ID=({}) RHOST=[{}] RPORT=({})",
            response.session_id, response.relay_host, response.relay_port
        );

        let parts = framed.into_parts();
        Ok(Self {
            stream: parts.io,
            read_buf: parts.read_buf,
            response,
        })
    }

    /// The session id the relay gave this connection; announcements refer to it.
    pub fn session_id(&self) -> u64 {
        self.response.session_id
    }

    /// The full hello response, including the address clients should be sent to.
    pub fn response(&self) -> &HostProcessHelloResponse {
        &self.response
    }

    /// The raw stream and any bytes already read past the handshake.
    pub fn into_parts(self) -> (TcpStream, BytesMut) {
        (self.stream, self.read_buf)
    }

    /// Feeds everything the paired client sends to `handler` until the relay closes the
    /// connection. Returns the number of bytes received.
    pub async fn serve(self, handler: &mut dyn PayloadHandler) -> Result<u64, RelayError> {
        let session_id = self.session_id();
        let (mut stream, mut read_buf) = self.into_parts();
        let mut received = 0u64;

        let result = pump(&mut stream, &mut read_buf, handler, &mut received).await;

        info!(
            "Host-process with session-ID ({}) has had its connection dropped.",
            session_id
        );
        handler.shutdown().await;
        result.map(|()| received)
    }
}

/// Hands buffered bytes to the handler first, then everything read after them.
async fn pump(
    stream: &mut TcpStream,
    read_buf: &mut BytesMut,
    handler: &mut dyn PayloadHandler,
    received: &mut u64,
) -> Result<(), RelayError> {
    loop {
        if !read_buf.is_empty() {
            let data = read_buf.split().freeze();
            *received += data.len() as u64;
            if let Some(reply) = handler.receive(data).await? {
                stream.write_all(&reply).await?;
            }
        }
        if stream.read_buf(read_buf).await? == 0 {
            return Ok(());
        }
    }
}
