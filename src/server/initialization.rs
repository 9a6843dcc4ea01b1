// src/server/initialization.rs

//! Handles relay initialization: binding every listener the mode calls for and building
//! the shared state.

use super::context::{RelayListener, ServerContext};
use crate::config::{Config, ListenerMode};
use crate::connection::ChannelKind;
use crate::core::state::RelayState;
use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Initializes all relay components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let mut listeners = Vec::new();
    for (channel, port) in config.listener_layout() {
        let listener = TcpListener::bind((config.host.as_str(), port))
            .await
            .with_context(|| {
                format!(
                    "Failed to bind {} listener on {}:{}",
                    channel, config.host, port
                )
            })?;
        info!(
            "Relay {} channel listening on {}",
            channel,
            listener.local_addr()?
        );
        listeners.push(RelayListener { channel, listener });
    }

    let client_channel = match config.mode {
        ListenerMode::Split => ChannelKind::Client,
        ListenerMode::Shared => ChannelKind::SharedData,
    };
    let client_facing_port = listeners
        .iter()
        .find(|l| l.channel == client_channel)
        .ok_or_else(|| anyhow!("No listener bound for the {} channel", client_channel))?
        .listener
        .local_addr()?
        .port();

    let connection_permits = Arc::new(Semaphore::new(config.max_connections));
    let state = Arc::new(RelayState::new(config).with_client_facing_port(client_facing_port));
    info!(
        "Relay state initialized; host-processes will be told to send clients to port {}.",
        state.announced_port()
    );

    Ok(ServerContext {
        state,
        listeners,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        connection_permits,
    })
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    match config.mode {
        ListenerMode::Split => info!("Relay starting in SPLIT mode (separate client port)."),
        ListenerMode::Shared => {
            info!("Relay starting in SHARED mode (clients and host-processes share a data port).")
        }
    }
    info!(
        "Drop grace period {:?}, handshake timeout {:?}, max {} connections.",
        config.session.drop_grace_period, config.session.handshake_timeout, config.max_connections
    );
    if config.session.drop_grace_period.is_zero() {
        warn!(
            "session.drop_grace_period is 0; host-processes will be closed as soon as their client drops."
        );
    }
    if config.announce.host.is_none() {
        warn!(
            "No announce.host configured; host-processes will be given the local address they connected to."
        );
    }
}
