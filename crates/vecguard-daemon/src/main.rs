//! Vecguard daemon
//!
//! Tenant-isolated access to a shared vector index.
//!
//! # Usage
//!
//! ```bash
//! vecguard start [--foreground] [--port PORT] [--engine-url URL]
//! vecguard stop
//! vecguard status
//! vecguard health [--json]
//! vecguard collection ensure|inspect
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/vecguard/config.toml)
//! 3. Environment variables (VECGUARD_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use vecguard_daemon::{
    check_health_once, handle_collection, show_status, start_daemon, stop_daemon, Cli, Commands,
    SettingsOverrides,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = cli.log_level.clone();

    match cli.command {
        Commands::Start {
            foreground,
            port,
            engine_url,
        } => {
            start_daemon(
                cli.config.as_deref(),
                foreground,
                SettingsOverrides {
                    port,
                    engine_url,
                    log_level,
                },
            )
            .await?;
        }
        Commands::Stop => {
            stop_daemon()?;
        }
        Commands::Status => {
            show_status()?;
        }
        Commands::Health { json, engine_url } => {
            check_health_once(
                cli.config.as_deref(),
                json,
                SettingsOverrides {
                    engine_url,
                    log_level,
                    ..Default::default()
                },
            )
            .await?;
        }
        Commands::Collection {
            engine_url,
            command,
        } => {
            handle_collection(
                cli.config.as_deref(),
                command,
                SettingsOverrides {
                    engine_url,
                    log_level,
                    ..Default::default()
                },
            )
            .await?;
        }
    }

    Ok(())
}
