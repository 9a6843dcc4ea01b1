// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;
use std::future::Future;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;

pub use connection_loop::shutdown_signal;
pub use context::{RelayListener, ServerContext};

/// The main relay startup function. Runs until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    let ctx = bind(config).await?;
    serve(ctx, shutdown_signal()).await
}

/// Binds every listener and builds the relay state without accepting anything yet.
pub async fn bind(config: Config) -> Result<ServerContext> {
    initialization::setup(config).await
}

/// Spawns the background tasks and accepts connections until `shutdown` resolves or a
/// shutdown is sent through `ServerContext::shutdown_handle`.
pub async fn serve<F>(mut ctx: ServerContext, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    spawner::spawn_all(&mut ctx)?;
    connection_loop::run(ctx, shutdown).await;
    Ok(())
}
