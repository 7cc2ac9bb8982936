//! Vecguard daemon library exports.
//!
//! - `cli`: command-line argument parsing with clap
//! - `commands`: command implementations

pub mod cli;
pub mod commands;

pub use cli::{Cli, CollectionCommands, Commands};
pub use commands::{
    check_health_once, handle_collection, load_settings, show_status, start_daemon, stop_daemon,
    SettingsOverrides,
};
