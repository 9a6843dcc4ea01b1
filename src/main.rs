// src/main.rs

//! The main entry point for the relayd binary: the relay itself, or with `--host-process`
//! the NAT-side agent that keeps connections parked at a relay.

use anyhow::{Result, anyhow};
use relayd::config::{Config, ConfigSource};
use relayd::endpoint::agent;
use relayd::server;
use std::env;
use tracing::{error, info, warn};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

const USAGE: &str = "Usage: relayd [--config config.toml] [--host-port N] [--command-port N] [--client-port N]
       relayd --host-process config.toml
       relayd --version";

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    // Collect command-line arguments to decide the execution mode.
    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("relayd version {VERSION}");
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{USAGE}");
        return Ok(());
    }

    if args.len() > 1 && args[1] == "--host-process" {
        // --- Host-process agent mode ---
        if args.len() != 3 {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
        let (config, _) = load_config(&args[2], false);
        init_logging(&config.log_level);

        info!("Starting relayd in host-process mode...");
        if let Err(e) = agent::run(config, server::shutdown_signal()).await {
            error!("Host-process runtime error: {}", e);
            return Err(e);
        }
    } else {
        // --- Relay mode ---

        // Falls back to the built-in defaults if the default config.toml is absent.
        let explicit_path = flag_value(&args, "--config");
        let config_path = explicit_path.unwrap_or("config.toml");
        let (mut config, source) = load_config(config_path, explicit_path.is_none());

        for (flag, port) in [
            ("--host-port", &mut config.ports.host_process),
            ("--command-port", &mut config.ports.command),
            ("--client-port", &mut config.ports.client),
        ] {
            if let Err(e) = override_port(&args, flag, port) {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
        if let Err(e) = config.validate() {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }

        init_logging(&config.log_level);
        if source == ConfigSource::Defaults {
            warn!(
                "Config file '{}' not found; using built-in defaults.",
                config_path
            );
        }

        if let Err(e) = server::run(config).await {
            error!("Relay runtime error: {}", e);
            return Err(e);
        }
    }

    Ok(())
}

/// Loads the configuration, exiting the process if it cannot be used.
fn load_config(path: &str, allow_missing: bool) -> (Config, ConfigSource) {
    let loaded = if allow_missing {
        Config::from_file_or_default(path)
    } else {
        Config::from_file(path).map(|cfg| (cfg, ConfigSource::File))
    };
    match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{path}\": {e:#}");
            std::process::exit(1);
        }
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

/// Applies `--<flag> N` to `port` if the flag is present.
fn override_port(args: &[String], flag: &str, port: &mut u16) -> Result<()> {
    if !args.iter().any(|arg| arg == flag) {
        return Ok(());
    }
    let value = flag_value(args, flag).ok_or_else(|| anyhow!("{flag} flag requires a value"))?;
    *port = value
        .parse::<u16>()
        .map_err(|_| anyhow!("Invalid port number for {flag}: {value}"))?;
    Ok(())
}

/// Sets up logging from `RUST_LOG`, or the configured level if it is unset.
fn init_logging(config_level: &str) {
    let level = env::var("RUST_LOG").unwrap_or_else(|_| config_level.to_string());
    tracing_subscriber::registry()
        .with(EnvFilter::new(level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true), // Enable ANSI color codes for log levels.
        )
        .init();
}
