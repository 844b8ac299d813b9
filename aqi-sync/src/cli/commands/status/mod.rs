//! `status`

pub mod handler;

use clap::Args;
use std::path::PathBuf;

pub use handler::handle_status_command;

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// SQLite database file (overrides the config file)
    #[arg(long)]
    pub db: Option<PathBuf>,
}
