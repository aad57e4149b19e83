//! Command-line entry point for the MQTT bridges.

mod bridges;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use iotbridge_core::BridgeConfig;
use tokio::sync::watch;

/// Bridges device traffic from the MQTT bus to downstream stores.
#[derive(Parser, Debug)]
#[command(name = "iotbridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bridge to run.
    #[command(subcommand)]
    command: Command,

    /// Path to the TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Append a random suffix to the MQTT client id.
    #[arg(long, global = true)]
    unique_client_id: bool,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Forward device data to the time-series database.
    Influx,
    /// Mirror device state into the key/value cache.
    Cache,
    /// Maintain the industrial-protocol address space.
    Opcua,
    /// Serve the HTTP ingestion API.
    UserApp,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = BridgeConfig::load(args.config.as_deref())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let options = bridges::RunOptions {
        unique_client_id: args.unique_client_id,
    };
    match args.command {
        Command::Influx => bridges::run_influx(&config, options, shutdown_rx).await,
        Command::Cache => bridges::run_cache(&config, options, shutdown_rx).await,
        Command::Opcua => bridges::run_opcua(&config, options, shutdown_rx).await,
        Command::UserApp => bridges::run_user_app(&config, shutdown_rx).await,
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var("IOTBRIDGE_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("iotbridge={}", default_level))
            .add_directive(tracing::Level::WARN.into())
    });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .compact()
            .init();
    }
}
