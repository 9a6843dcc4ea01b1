// src/endpoint/handler.rs

//! The contract between a host-process connection and the service behind it.

use crate::config::HandlerKind;
use crate::core::RelayError;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

/// Receives the raw bytes a paired client sends through the relay.
#[async_trait]
pub trait PayloadHandler: Send {
    /// Handles one chunk. Any bytes returned are written back towards the client.
    async fn receive(&mut self, data: Bytes) -> Result<Option<Bytes>, RelayError>;

    /// Called once when the relay connection has ended, for any reason.
    async fn shutdown(&mut self);
}

/// Writes every received chunk straight back.
#[derive(Debug, Default)]
pub struct EchoHandler {
    echoed: u64,
}

#[async_trait]
impl PayloadHandler for EchoHandler {
    async fn receive(&mut self, data: Bytes) -> Result<Option<Bytes>, RelayError> {
        self.echoed += data.len() as u64;
        Ok(Some(data))
    }

    async fn shutdown(&mut self) {
        debug!("Echo handler shutting down after ({}) bytes.", self.echoed);
    }
}

/// Logs and discards everything it receives.
#[derive(Debug, Default)]
pub struct LoggingHandler {
    chunks: u64,
    received: u64,
}

#[async_trait]
impl PayloadHandler for LoggingHandler {
    async fn receive(&mut self, data: Bytes) -> Result<Option<Bytes>, RelayError> {
        self.chunks += 1;
        self.received += data.len() as u64;
        info!(
            "Received ({}) bytes of proxied data ({} total).",
            data.len(),
            self.received
        );
        Ok(None)
    }

    async fn shutdown(&mut self) {
        info!(
            "Logging handler shutting down after ({}) chunks, ({}) bytes.",
            self.chunks, self.received
        );
    }
}

/// Builds the handler `kind` names.
pub fn handler_for(kind: HandlerKind) -> Box<dyn PayloadHandler> {
    match kind {
        HandlerKind::Echo => Box::new(EchoHandler::default()),
        HandlerKind::Log => Box::new(LoggingHandler::default()),
    }
}
