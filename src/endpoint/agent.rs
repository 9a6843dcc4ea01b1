// src/endpoint/agent.rs

//! `--host-process` mode: keeps a pool of data connections parked at the relay, plus a
//! command listener, and re-establishes each one after it closes.

use super::command_listener::CommandListener;
use super::handler::handler_for;
use super::host_process::HostProcessEndpoint;
use crate::config::{Config, HandlerKind};
use anyhow::{Result, anyhow};
use futures::StreamExt;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_FACTOR: f64 = std::f64::consts::E;
const RECONNECT_JITTER: f64 = 0.12;

/// Exponential reconnect delay with jitter, capped at `max`.
#[derive(Debug)]
pub struct Backoff {
    delay: Duration,
    max: Duration,
    rng: SmallRng,
}

impl Backoff {
    pub fn new(max: Duration) -> Self {
        Self {
            delay: INITIAL_RECONNECT_DELAY.min(max),
            max,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Forgets previous failures after a successful handshake.
    pub fn reset(&mut self) {
        self.delay = INITIAL_RECONNECT_DELAY.min(self.max);
    }

    /// The delay before the next attempt. Grows with every call until `reset`.
    pub fn next_delay(&mut self) -> Duration {
        let jitter = self.rng.gen_range(-RECONNECT_JITTER..=RECONNECT_JITTER);
        let current = self.delay.mul_f64(1.0 + jitter).min(self.max);
        self.delay = self.delay.mul_f64(RECONNECT_FACTOR).min(self.max);
        current
    }
}

/// The main entry point for running as a host-process agent. Runs until `shutdown` resolves.
pub async fn run<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let agent = &config.host_process;
    let data_addr = format!("{}:{}", agent.relay_host, config.ports.host_process);
    let command_addr = format!("{}:{}", agent.relay_host, config.ports.command);
    info!(
        "Host-process agent starting: {} connection(s) to {}, command channel at {}, {:?} handler.",
        agent.connections, data_addr, command_addr, agent.handler
    );

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();
    tasks.spawn(run_command_listener(command_addr, agent.max_reconnect_delay));
    for slot in 0..agent.connections {
        tasks.spawn(run_host_slot(
            slot,
            data_addr.clone(),
            agent.handler,
            agent.max_reconnect_delay,
        ));
    }

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Host-process agent shutting down.");
                tasks.shutdown().await;
                return Ok(());
            }
            res = tasks.join_next() => match res {
                Some(Ok(Ok(()))) => warn!("A host-process task completed unexpectedly without an error."),
                Some(Ok(Err(e))) => error!("A host-process task failed: {}", e),
                Some(Err(e)) => error!("A host-process task panicked: {}", e),
                None => return Err(anyhow!("All host-process tasks have terminated. Shutting down.")),
            },
        }
    }
}

/// Keeps one data connection parked at the relay, forever.
async fn run_host_slot(
    slot: usize,
    addr: String,
    handler_kind: HandlerKind,
    max_delay: Duration,
) -> Result<()> {
    let mut backoff = Backoff::new(max_delay);
    loop {
        match HostProcessEndpoint::connect(addr.as_str()).await {
            Ok(endpoint) => {
                backoff.reset();
                let session_id = endpoint.session_id();
                debug!("Slot {} parked as session ({}).", slot, session_id);

                let mut handler = handler_for(handler_kind);
                match endpoint.serve(handler.as_mut()).await {
                    Ok(received) => debug!(
                        "Slot {}: session ({}) closed after ({}) bytes.",
                        slot, session_id, received
                    ),
                    Err(e) => warn!("Slot {}: session ({}) failed: {}", slot, session_id, e),
                }
            }
            Err(e) => warn!("Slot {}: could not connect to relay at {}: {}", slot, addr, e),
        }

        let delay = backoff.next_delay();
        debug!("Slot {}: reconnecting in {:?}.", slot, delay);
        tokio::time::sleep(delay).await;
    }
}

/// Follows the command channel, logging each announcement, and reconnects when it drops.
async fn run_command_listener(addr: String, max_delay: Duration) -> Result<()> {
    let mut backoff = Backoff::new(max_delay);
    loop {
        match CommandListener::connect(addr.as_str()).await {
            Ok(listener) => {
                backoff.reset();
                let mut announcements = Box::pin(listener.into_stream());
                while let Some(next) = announcements.next().await {
                    match next {
                        Ok(announcement) => info!("Received announcement: {:?}", announcement),
                        Err(e) => {
                            warn!("Command channel error: {}", e);
                            break;
                        }
                    }
                }
                info!("Command channel closed by the relay.");
            }
            Err(e) => warn!("Could not connect command-listener to {}: {}", addr, e),
        }

        let delay = backoff.next_delay();
        debug!("Command-listener reconnecting in {:?}.", delay);
        tokio::time::sleep(delay).await;
    }
}
