// src/server/connection_loop.rs

//! Contains the main relay loop for accepting connections and handling graceful shutdown.

use super::context::{RelayListener, ServerContext};
use crate::connection::{ChannelKind, ConnectionHandler};
use crate::core::metrics;
use futures::future::select_all;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Resolves on the first SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to register SIGTERM handler: {}", e);
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("SIGINT received, initiating graceful shutdown.");
            }
            return;
        }
    };

    tokio::select! {
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => info!("SIGINT received, initiating graceful shutdown."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        },
        _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
    }
}

/// Waits for a connection on any of the listeners.
async fn accept_any(
    listeners: &[RelayListener],
) -> (io::Result<(TcpStream, SocketAddr)>, ChannelKind) {
    let accepts = listeners.iter().map(|l| {
        Box::pin(async move { (l.listener.accept().await, l.channel) })
    });
    let (accepted, _, _) = select_all(accepts).await;
    accepted
}

/// The main relay loop that accepts connections and handles graceful shutdown.
pub async fn run<F>(mut ctx: ServerContext, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut client_tasks = JoinSet::new();
    let mut shutdown_rx = ctx.shutdown_tx.subscribe();
    tokio::pin!(shutdown);

    if ctx.listeners.is_empty() {
        error!("No listeners bound; nothing to accept.");
        return;
    }

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,
            _ = shutdown_rx.recv() => {
                info!("Shutdown requested, stopping the accept loop.");
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            (res, channel) = accept_any(&ctx.listeners) => {
                match res {
                    Ok((socket, addr)) => {
                        metrics::CONNECTIONS_RECEIVED_TOTAL.with_label_values(&[channel.as_str()]).inc();

                        let permit = match ctx.connection_permits.clone().try_acquire_owned() {
                            Ok(permit) => permit,
                            Err(_) => {
                                warn!(
                                    "Connection limit reached; rejecting {} connection from {}.",
                                    channel, addr
                                );
                                metrics::CONNECTIONS_REJECTED_TOTAL.inc();
                                continue;
                            }
                        };

                        let session_id = ctx.state.allocate_session_id();
                        info!(
                            "Accepted new {} connection from {} as session {}.",
                            channel, addr, session_id
                        );
                        let state_clone = ctx.state.clone();
                        let shutdown_rx = ctx.shutdown_tx.subscribe();

                        client_tasks.spawn(async move {
                            let handler = ConnectionHandler::new(socket, addr, state_clone, session_id, channel, shutdown_rx);
                            if let Err(e) = handler.run().await {
                                debug!("Connection from {} terminated with error: {}", addr, e);
                            }
                            drop(permit);
                        });
                    }
                    Err(e) => error!("Failed to accept {} connection: {}", channel, e),
                }
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A connection handler panicked: {e:?}");
                }
            },
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    // An error only means every receiver has already gone away.
    let _ = ctx.shutdown_tx.send(());
    drop(ctx.listeners);

    if tokio::time::timeout(Duration::from_secs(5), async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for connections to close; aborting the rest.");
        client_tasks.shutdown().await;
    }
    info!("All relay connections closed.");

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Relay shutdown complete.");
}
