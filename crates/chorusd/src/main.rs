//! chorusd - synchronized multi-room audio stream server
//!
//! # Usage
//!
//! ```bash
//! # Feed PCM into the FIFO and run with defaults (stream 1704, control 1705)
//! mkfifo /tmp/chorus_fifo
//! chorusd
//!
//! # Explicit config
//! chorusd --config /etc/chorus/chorus.toml
//! chorusd --log-level debug
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use chorus_config::{ClientRegistry, Settings};
use chorus_server::StreamServer;

/// Synchronized multi-room audio stream server
#[derive(Parser, Debug)]
#[command(name = "chorusd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (error if specified but not found)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(cli.config.as_deref())?;
    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.log.level.clone());
    init_logging(&log_level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        stream_port = settings.stream.port,
        control_port = settings.control.port,
        fifo = %settings.source.fifo.display(),
        "chorusd starting"
    );

    let registry = Arc::new(
        ClientRegistry::open(&settings.state.clients_file)
            .context("failed to open client registry")?,
    );

    let server = StreamServer::new(&settings, registry).context("failed to build server")?;
    if let Err(e) = server.start().await {
        error!(error = %e, "startup failed");
        return Err(e.into());
    }

    signal::ctrl_c().await.context("failed to wait for ctrl-c")?;
    info!("shutting down");
    server.stop();

    Ok(())
}

/// Resolve settings: explicit path must exist, otherwise try the default
/// location and fall back to built-in defaults
fn load_settings(path: Option<&std::path::Path>) -> Result<Settings> {
    match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            Settings::from_file(path).context("failed to load configuration")
        }
        None => {
            let default_path = PathBuf::from("chorus.toml");
            if default_path.exists() {
                Settings::from_file(&default_path).context("failed to load configuration")
            } else {
                Ok(Settings::default())
            }
        }
    }
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}
