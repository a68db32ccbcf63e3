//! GlobalCache device broker: entry point.
//!
//! Runs one [`DeviceFacade`] against a controller described by a TOML file
//! and forwards channel commands typed on stdin to it.  Channel updates and
//! status changes are written to the log.
//!
//! # Usage
//!
//! ```text
//! gc-broker [OPTIONS]
//!
//! Options:
//!   --config    <PATH>      Configuration file [default: gc-broker.toml]
//!   --log-level <LEVEL>     Overrides [logging].log_level
//!   --write-default-config  Writes a default file to --config and exits
//! ```
//!
//! Each stdin line is `<channel-id> <command>`, for example:
//!
//! ```text
//! projector-power ON
//! tv-ir POWER
//! amp-direct PWR%3DON%0D
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable              | Description                                     |
//! |-----------------------|-------------------------------------------------|
//! | `GC_BROKER_CONFIG`    | Same as `--config`                              |
//! | `GC_BROKER_LOG_LEVEL` | Same as `--log-level`                           |
//! | `RUST_LOG`            | Full `tracing` filter; wins over both of the above |
//!
//! The broker stops on Ctrl+C or when stdin is closed.

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gc_broker::application::device_facade::DeviceFacade;
use gc_broker::application::host::HostCommand;
use gc_broker::infrastructure::host::LoggingHost;
use gc_broker::infrastructure::storage::config::{load_config, save_config, AppConfig};

/// How often the input loop checks the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Command broker for GlobalCache iTach / GC-100 controllers.
#[derive(Debug, Parser)]
#[command(
    name = "gc-broker",
    about = "Command broker for GlobalCache iTach and GC-100 IR/serial/relay controllers",
    version
)]
struct Cli {
    /// Path of the TOML configuration file.
    #[arg(long, default_value = "gc-broker.toml", env = "GC_BROKER_CONFIG")]
    config: PathBuf,

    /// Log level (`error`, `warn`, `info`, `debug`, `trace`).
    ///
    /// Ignored when `RUST_LOG` is set.
    #[arg(long, env = "GC_BROKER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Write a default configuration file to `--config` and exit.
    #[arg(long)]
    write_default_config: bool,
}

/// Writes `AppConfig::default()` to `path`.  An existing file is left alone.
fn write_default_config(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    save_config(path, &AppConfig::default())
        .with_context(|| format!("failed to write config to {}", path.display()))
}

/// Splits a stdin line into a channel id and a host command.
///
/// Returns `None` for blank lines, `#` comments, and lines without a command.
fn parse_input_line(line: &str) -> Option<(String, HostCommand)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (channel, command) = line.split_once(char::is_whitespace)?;
    let command = command.trim();
    if command.is_empty() {
        return None;
    }
    Some((channel.to_string(), HostCommand::parse(command)))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.write_default_config {
        write_default_config(&cli.config)?;
        println!("wrote default configuration to {}", cli.config.display());
        return Ok(());
    }

    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    // RUST_LOG wins, then --log-level, then the config file.
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    info!(
        "gc-broker starting: device {} ({}) at {:?}",
        config.device.name, config.device.device_type, config.device.host
    );

    let host = Arc::new(LoggingHost::new(config.device.name.clone()));
    let facade = DeviceFacade::new(config, host);
    facade
        .initialize()
        .await
        .context("failed to initialize device")?;

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    // ── Input loop ────────────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while running.load(Ordering::Relaxed) {
        let line = match tokio::time::timeout(SHUTDOWN_POLL, lines.next_line()).await {
            Err(_) => continue,
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                info!("stdin closed, shutting down");
                break;
            }
            Ok(Err(e)) => {
                error!("failed to read stdin: {e}");
                break;
            }
        };

        let Some((channel, command)) = parse_input_line(&line) else {
            continue;
        };
        if let Err(e) = facade.handle_command(&channel, command).await {
            warn!("{channel}: {e}");
        }
    }

    facade.dispose().await;
    info!("gc-broker stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
