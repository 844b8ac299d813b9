//! `schema` subcommands

pub mod handler;

use clap::Subcommand;
use std::path::PathBuf;

pub use handler::handle_schema_command;

#[derive(Subcommand, Debug, Clone)]
pub enum SchemaCommands {
    /// List registered entity types
    List {
        /// Schema declaration file instead of the built-in catalogue
        #[arg(long)]
        schema: Option<PathBuf>,
    },
    /// Print one entity type's declaration as TOML
    Show {
        /// Entity type (case-insensitive)
        entity_type: String,
        #[arg(long)]
        schema: Option<PathBuf>,
    },
    /// Validate a schema declaration file without touching the network
    Check {
        /// File to check; defaults to the configured schema file, then the built-in catalogue
        file: Option<PathBuf>,
    },
}
