//! CLI argument parsing for the vecguard daemon.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

/// Vecguard daemon
///
/// Tenant-isolated access to a shared vector index.
#[derive(Parser, Debug)]
#[command(name = "vecguard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/vecguard/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,

        /// Override the gRPC health port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the index engine URL
        #[arg(long)]
        engine_url: Option<String>,
    },

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,

    /// Run one health check against the index engine and print the report
    Health {
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,

        #[arg(long)]
        engine_url: Option<String>,
    },

    /// Collection management
    Collection {
        #[arg(long)]
        engine_url: Option<String>,

        #[command(subcommand)]
        command: CollectionCommands,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CollectionCommands {
    /// Create the collection or add missing indexes
    Ensure,

    /// Show the collection's schema and compatibility
    Inspect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_start_foreground() {
        let cli = Cli::parse_from(["vecguard", "start", "--foreground"]);
        match cli.command {
            Commands::Start { foreground, .. } => assert!(foreground),
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_cli_start_overrides() {
        let cli = Cli::parse_from([
            "vecguard",
            "start",
            "-p",
            "9999",
            "--engine-url",
            "http://qdrant:6333",
        ]);
        match cli.command {
            Commands::Start {
                port, engine_url, ..
            } => {
                assert_eq!(port, Some(9999));
                assert_eq!(engine_url.as_deref(), Some("http://qdrant:6333"));
            }
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from([
            "vecguard",
            "status",
            "--config",
            "/etc/vecguard.toml",
            "-l",
            "debug",
        ]);
        assert_eq!(cli.config.as_deref(), Some("/etc/vecguard.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_cli_stop() {
        let cli = Cli::parse_from(["vecguard", "stop"]);
        assert!(matches!(cli.command, Commands::Stop));
    }

    #[test]
    fn test_cli_health_json() {
        let cli = Cli::parse_from(["vecguard", "health", "--json"]);
        match cli.command {
            Commands::Health { json, engine_url } => {
                assert!(json);
                assert!(engine_url.is_none());
            }
            _ => panic!("Expected Health command"),
        }
    }

    #[test]
    fn test_cli_collection_subcommands() {
        let cli = Cli::parse_from(["vecguard", "collection", "ensure"]);
        match cli.command {
            Commands::Collection { command, .. } => assert_eq!(command, CollectionCommands::Ensure),
            _ => panic!("Expected Collection command"),
        }

        let cli = Cli::parse_from([
            "vecguard",
            "collection",
            "--engine-url",
            "http://x:6333",
            "inspect",
        ]);
        match cli.command {
            Commands::Collection { command, engine_url } => {
                assert_eq!(command, CollectionCommands::Inspect);
                assert_eq!(engine_url.as_deref(), Some("http://x:6333"));
            }
            _ => panic!("Expected Collection command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["vecguard", "compact"]).is_err());
    }
}
