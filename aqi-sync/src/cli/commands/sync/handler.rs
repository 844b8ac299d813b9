//! Sync command handlers

use anyhow::{Context, Result};
use colored::*;
use std::collections::BTreeMap;
use std::time::Instant;

use super::{SyncAllArgs, SyncArgs};
use crate::api::ConcurrencyLimiter;
use crate::cli::engine::{build_driver, load_registry, open_store, parse_url_args};
use crate::config::AppConfig;
use crate::sync::report::render_run;
use crate::sync::SyncRequest;

/// Synchronize a single entity type
pub async fn handle_sync_command(args: SyncArgs, config: &AppConfig) -> Result<()> {
    let registry = load_registry(config, &args.engine)?;
    let entity_type = registry
        .canonical_name(&args.entity_type)
        .ok_or_else(|| {
            let known: Vec<_> = registry.syncable().map(|s| s.name.as_str()).collect();
            anyhow::anyhow!(
                "Unknown entity type '{}'. Known feeds: {}",
                args.entity_type,
                known.join(", ")
            )
        })?
        .to_string();

    let params = match &args.url_args {
        Some(raw) => parse_url_args(raw)?,
        None => BTreeMap::new(),
    };

    let mut request = SyncRequest::new(&entity_type).with_params(params);
    if let Some(url) = args.url.as_deref().or(config.endpoint_for(&entity_type)) {
        request = request.with_endpoint(url);
    }

    let store = open_store(config, &args.store).await?;
    let driver = build_driver(config, &args.engine, registry, &store)?;

    let result = driver
        .sync_entity_type(&request)
        .await
        .with_context(|| format!("Sync of {} failed", entity_type))?;

    store.record_run(&result).await;
    print!("{}", render_run(&result));

    Ok(())
}

/// Synchronize every entity type with a feed, in catalogue order
pub async fn handle_sync_all_command(args: SyncAllArgs, config: &AppConfig) -> Result<()> {
    let started = Instant::now();
    let registry = load_registry(config, &args.engine)?;

    let requests: Vec<SyncRequest> = registry
        .syncable()
        .map(|schema| {
            let request = SyncRequest::new(&schema.name);
            match config.endpoint_for(&schema.name) {
                Some(url) => request.with_endpoint(url),
                None => request,
            }
        })
        .collect();

    if requests.is_empty() {
        println!("{}", "No entity type declares a feed; nothing to sync.".yellow());
        return Ok(());
    }

    let store = open_store(config, &args.store).await?;
    let driver = build_driver(config, &args.engine, registry, &store)?;
    let limiter = ConcurrencyLimiter::new(config.concurrency(args.jobs));

    println!(
        "Syncing {} entity types into the {}",
        requests.len().to_string().bright_cyan().bold(),
        store.describe()
    );

    let outcomes = driver.sync_many(&requests, &limiter).await;

    let mut fatal = Vec::new();
    for outcome in &outcomes {
        match &outcome.result {
            Ok(result) => {
                store.record_run(result).await;
                print!("{}", render_run(result));
            }
            Err(e) => {
                println!("{} {}", outcome.entity_type.bright_cyan().bold(), "failed".red().bold());
                println!("  {}", e.to_string().red());
                fatal.push(outcome.entity_type.as_str());
            }
        }
    }

    println!(
        "Finished {} entity types in {:.2?}",
        outcomes.len(),
        started.elapsed()
    );

    if !fatal.is_empty() {
        anyhow::bail!(
            "{} of {} entity types failed: {}",
            fatal.len(),
            outcomes.len(),
            fatal.join(", ")
        );
    }

    Ok(())
}
