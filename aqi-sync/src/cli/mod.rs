//! Command-line interface

pub mod commands;
pub mod engine;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::schema::SchemaCommands;
use commands::status::StatusArgs;
use commands::sync::{SyncAllArgs, SyncArgs};

#[derive(Parser)]
#[command(name = "aqi-sync")]
#[command(version)]
#[command(about = "Synchronize EPA Victoria AirWatch feeds into a local database", long_about = None)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace); defaults to RUST_LOG, then info
    #[arg(long, global = true)]
    pub level: Option<String>,

    /// Config file (defaults to $AQI_SYNC_CONFIG or the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synchronize one entity type
    Sync(SyncArgs),
    /// Synchronize every entity type that has a feed
    SyncAll(SyncAllArgs),
    /// Inspect entity schemas
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
    /// Show stored record counts and the last run per entity type
    Status(StatusArgs),
}
