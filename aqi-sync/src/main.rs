mod api;
mod cli;
mod config;
mod store;
mod sync;

use anyhow::Result;
use clap::Parser;
use colored::*;
use env_logger::Env;

use cli::commands::{schema, status, sync as sync_cmd};
use cli::{Cli, Commands};
use config::AppConfig;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.level.as_deref());

    if let Err(e) = run(cli).await {
        log::error!("{:#}", e);
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(level: Option<&str>) {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(level) = level {
        builder.parse_filters(level);
    }
    builder.format_timestamp_secs().init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Sync(args) => sync_cmd::handle_sync_command(args, &config).await,
        Commands::SyncAll(args) => sync_cmd::handle_sync_all_command(args, &config).await,
        Commands::Schema { command } => schema::handle_schema_command(command, &config).await,
        Commands::Status(args) => status::handle_status_command(args, &config).await,
    }
}
