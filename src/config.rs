// src/config.rs

//! Manages relay configuration: loading, defaults, and validation.

use crate::connection::ChannelKind;
use crate::core::protocol::DEFAULT_MAX_FRAME_LEN;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// How the data-channel listeners are laid out.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ListenerMode {
    /// Separate host-process data, command, and client data ports.
    #[default]
    Split,
    /// Legacy layout: one data port shared by clients and host-processes (told apart by
    /// their hello), plus the command port.
    Shared,
}

/// Listener ports. In shared mode `host_process` is the single data port and `client` is unused.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PortsConfig {
    #[serde(default = "default_host_process_port")]
    pub host_process: u16,
    #[serde(default = "default_command_port")]
    pub command: u16,
    #[serde(default = "default_client_port")]
    pub client: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            host_process: default_host_process_port(),
            command: default_command_port(),
            client: default_client_port(),
        }
    }
}

fn default_host_process_port() -> u16 {
    8000
}
fn default_command_port() -> u16 {
    8001
}
fn default_client_port() -> u16 {
    8002
}

/// The address handed to host-processes in their hello response.
/// Unset fields fall back to the locally observed address and the client-facing port.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AnnounceConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Per-connection limits and timers.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionConfig {
    /// How long a host-process stays open after its client drops.
    #[serde(with = "humantime_serde", default = "default_drop_grace_period")]
    pub drop_grace_period: Duration,
    /// How long a data-channel peer has to send its hello.
    #[serde(with = "humantime_serde", default = "default_handshake_timeout")]
    pub handshake_timeout: Duration,
    /// Rejects handshake frames whose declared length exceeds this.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Caps the bytes a waiting host-process may send before it has a client.
    #[serde(default = "default_max_pending_bytes")]
    pub max_pending_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            drop_grace_period: default_drop_grace_period(),
            handshake_timeout: default_handshake_timeout(),
            max_frame_len: default_max_frame_len(),
            max_pending_bytes: default_max_pending_bytes(),
        }
    }
}

fn default_drop_grace_period() -> Duration {
    Duration::from_secs(5)
}
fn default_handshake_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}
fn default_max_pending_bytes() -> usize {
    1024 * 1024 // 1 MB
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    9878
}

/// Which payload handler the host-process agent plugs into each assigned connection.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HandlerKind {
    #[default]
    Echo,
    Log,
}

/// Settings for `--host-process` mode, where this binary acts as the NAT-side agent.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HostProcessConfig {
    /// The relay to connect to.
    #[serde(default = "default_relay_host")]
    pub relay_host: String,
    /// Number of idle data connections to keep parked at the relay.
    #[serde(default = "default_agent_connections")]
    pub connections: usize,
    #[serde(default)]
    pub handler: HandlerKind,
    /// Upper bound for the reconnect backoff.
    #[serde(with = "humantime_serde", default = "default_max_reconnect_delay")]
    pub max_reconnect_delay: Duration,
}

impl Default for HostProcessConfig {
    fn default() -> Self {
        Self {
            relay_host: default_relay_host(),
            connections: default_agent_connections(),
            handler: HandlerKind::default(),
            max_reconnect_delay: default_max_reconnect_delay(),
        }
    }
}

fn default_relay_host() -> String {
    "localhost".to_string()
}
fn default_agent_connections() -> usize {
    10
}
fn default_max_reconnect_delay() -> Duration {
    Duration::from_secs(30)
}

/// Where a loaded configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// The file was absent and the built-in defaults were used.
    Defaults,
}

/// The complete relay configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub mode: ListenerMode,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub announce: AnnounceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub host_process: HostProcessConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_connections() -> usize {
    10000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            log_level: default_log_level(),
            mode: ListenerMode::default(),
            ports: PortsConfig::default(),
            announce: AnnounceConfig::default(),
            session: SessionConfig::default(),
            max_connections: default_max_connections(),
            metrics: MetricsConfig::default(),
            host_process: HostProcessConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config = Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to load config from '{path}'"))?;
        Ok(config)
    }

    /// Like `from_file`, but falls back to the defaults when `path` does not exist.
    /// Nothing is logged here; the caller reports the source once logging is set up.
    pub fn from_file_or_default(path: &str) -> Result<(Self, ConfigSource)> {
        if Path::new(path).exists() {
            Ok((Self::from_file(path)?, ConfigSource::File))
        } else {
            let config = Config::default();
            config.validate()?;
            Ok((config, ConfigSource::Defaults))
        }
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Which channel each listener the configured mode calls for serves, and its port.
    pub fn listener_layout(&self) -> Vec<(ChannelKind, u16)> {
        match self.mode {
            ListenerMode::Split => vec![
                (ChannelKind::HostProcess, self.ports.host_process),
                (ChannelKind::Command, self.ports.command),
                (ChannelKind::Client, self.ports.client),
            ],
            ListenerMode::Shared => vec![
                (ChannelKind::SharedData, self.ports.host_process),
                (ChannelKind::Command, self.ports.command),
            ],
        }
    }

    /// The port clients should connect to, which is what host-processes are told.
    pub fn client_facing_port(&self) -> u16 {
        match self.mode {
            ListenerMode::Split => self.ports.client,
            ListenerMode::Shared => self.ports.host_process,
        }
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }

        // Port 0 asks the OS for an ephemeral port, so it never clashes.
        let ports = self.listener_layout();
        for (i, (name, port)) in ports.iter().enumerate() {
            if *port == 0 {
                continue;
            }
            if let Some((other, _)) = ports[..i].iter().find(|(_, p)| p == port) {
                return Err(anyhow!(
                    "ports.{} and ports.{} cannot share port {}",
                    other,
                    name,
                    port
                ));
            }
        }

        if self.max_connections == 0 {
            return Err(anyhow!("max_connections cannot be 0"));
        }
        if self.session.max_frame_len == 0 {
            return Err(anyhow!("session.max_frame_len cannot be 0"));
        }
        if self.session.max_pending_bytes == 0 {
            return Err(anyhow!("session.max_pending_bytes cannot be 0"));
        }
        if self.session.handshake_timeout.is_zero() {
            return Err(anyhow!("session.handshake_timeout cannot be 0"));
        }
        if let Some(0) = self.announce.port {
            return Err(anyhow!("announce.port cannot be 0"));
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if ports.iter().any(|(_, p)| *p == self.metrics.port) {
                return Err(anyhow!(
                    "metrics.port cannot be the same as a relay listener port"
                ));
            }
        }

        if self.host_process.connections == 0 {
            return Err(anyhow!("host_process.connections cannot be 0"));
        }
        if self.host_process.max_reconnect_delay.is_zero() {
            return Err(anyhow!("host_process.max_reconnect_delay cannot be 0"));
        }
        Ok(())
    }
}
