//! `walrus` command line tool.

mod cli;
mod commands;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use walrus_core::WalrusConfig;

use crate::cli::{Args, Command};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "walrus.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("Walrus v{}", walrus_core::VERSION);

    let config = load_config(args.config.as_deref())?;
    debug!(?config, "Configuration loaded");

    let transport = commands::transport(args.mock, &config)?;
    let manager = commands::manager(transport, config);

    let result = match args.command {
        Command::List => commands::list(&manager).await,
        Command::Watch => commands::watch(&manager).await,
        Command::Read { device, timeout_ms } => {
            commands::read(&manager, device, Duration::from_millis(timeout_ms)).await
        }
    };

    manager.shutdown().await;
    result
}

fn load_config(path: Option<&Path>) -> Result<WalrusConfig> {
    match path {
        Some(path) => WalrusConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => WalrusConfig::load(DEFAULT_CONFIG_FILE)
            .with_context(|| format!("failed to load {DEFAULT_CONFIG_FILE}")),
        None => Ok(WalrusConfig::default()),
    }
}
