//! # homesync
//!
//! CLI tool for the homesync push channel.
//!
//! ## Commands
//!
//! - `init`: Write a starter configuration file
//! - `check-config`: Validate and print the effective configuration
//! - `watch`: Connect and print live accessory updates
//!
//! ## Example
//!
//! ```bash
//! # Point at a hub
//! homesync init --endpoint wss://hub.example.com/ws
//!
//! # Check the settings
//! homesync check-config
//!
//! # Watch updates for a minute
//! HOMESYNC_TOKEN=... homesync watch --seconds 60
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{check, init, watch};

/// CLI tool for the homesync push channel.
#[derive(Parser, Debug)]
#[command(name = "homesync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log connection internals
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter configuration file
    Init {
        /// WebSocket endpoint
        #[arg(long)]
        endpoint: Option<String>,

        /// Bearer token to store in the file
        #[arg(long)]
        token: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate and print the effective configuration
    CheckConfig,

    /// Connect and print live accessory updates
    Watch {
        /// WebSocket endpoint (overrides the file)
        #[arg(long)]
        endpoint: Option<String>,

        /// Bearer token (overrides the file)
        #[arg(long, env = "HOMESYNC_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "homesync=debug,homesync_client=debug,homesync_core=debug"
    } else {
        "homesync=info,homesync_client=info,homesync_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };

    match cli.command {
        Commands::Init {
            endpoint,
            token,
            force,
        } => {
            init::run(&config_path, endpoint, token, force).await?;
        }
        Commands::CheckConfig => {
            let hub = config::load(&config_path).await?;
            check::run(&config_path, &hub)?;
        }
        Commands::Watch {
            endpoint,
            token,
            seconds,
        } => {
            let mut hub = config::load(&config_path).await?;
            config::apply_overrides(&mut hub, endpoint, token);
            watch::run(hub, seconds).await?;
        }
    }

    Ok(())
}
