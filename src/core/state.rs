// src/core/state.rs

//! Defines `RelayState`, the shared context every listener and connection handler holds.

use super::peer::SessionId;
use super::registry::SessionRegistry;
use crate::config::Config;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide state, wrapped in an `Arc` and handed to every task.
#[derive(Debug)]
pub struct RelayState {
    /// The validated configuration the relay was started with.
    pub config: Arc<Config>,
    /// The single assignment manager; the only shared mutable relay state.
    pub registry: SessionRegistry,
    /// The port host-processes are told clients should use, absent an `announce.port`.
    client_facing_port: u16,
    next_session_id: AtomicU64,
}

impl RelayState {
    pub fn new(config: Config) -> Self {
        let registry = SessionRegistry::new(config.session.drop_grace_period);
        let client_facing_port = config.client_facing_port();
        Self {
            config: Arc::new(config),
            registry,
            client_facing_port,
            next_session_id: AtomicU64::new(0),
        }
    }

    /// Replaces the configured client-facing port with the one actually bound, which
    /// differs when the config asked for an ephemeral port.
    pub fn with_client_facing_port(mut self, port: u16) -> Self {
        self.client_facing_port = port;
        self
    }

    /// The address host-processes are told to hand their clients.
    pub fn announced_port(&self) -> u16 {
        self.config.announce.port.unwrap_or(self.client_facing_port)
    }

    /// Hands out the next session id. Ids are shared across all listeners and start at 1.
    pub fn allocate_session_id(&self) -> SessionId {
        self.next_session_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}
