// src/server/context.rs

use crate::connection::ChannelKind;
use crate::core::state::RelayState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;

/// A bound listener and the channel its connections belong to.
#[derive(Debug)]
pub struct RelayListener {
    pub channel: ChannelKind,
    pub listener: TcpListener,
}

/// Holds all the initialized state required to run the relay's main loop.
pub struct ServerContext {
    pub state: Arc<RelayState>,
    pub listeners: Vec<RelayListener>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
    pub connection_permits: Arc<Semaphore>,
}

impl ServerContext {
    /// The address a channel's listener is actually bound to.
    pub fn local_addr(&self, channel: ChannelKind) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|l| l.channel == channel)
            .and_then(|l| l.listener.local_addr().ok())
    }

    /// A sender that stops the relay when fired, for embedding without OS signals.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }
}
