//! `sync` and `sync-all`

pub mod handler;

use clap::Args;

use crate::cli::engine::{EngineArgs, StoreArgs};

pub use handler::{handle_sync_all_command, handle_sync_command};

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Entity type to synchronize (case-insensitive), e.g. Site or Measurement
    pub entity_type: String,

    /// Fetch from this URL instead of the feed's endpoint
    #[arg(long)]
    pub url: Option<String>,

    /// Extra query parameters as a JSON object, e.g. '{"siteId": 10001}'
    #[arg(long)]
    pub url_args: Option<String>,

    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SyncAllArgs {
    /// Entity types synchronized at the same time (default from config, else 1)
    #[arg(long)]
    pub jobs: Option<usize>,

    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(flatten)]
    pub store: StoreArgs,
}
