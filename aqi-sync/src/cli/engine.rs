//! Wiring shared by the sync commands: registry, store, fetcher and driver

use anyhow::{Context, Result};
use clap::Args;
use log::{info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::api::FeedClient;
use crate::config::AppConfig;
use crate::store::{MemoryStore, RecordStore, SqliteStore};
use crate::sync::catalog::airwatch_registry;
use crate::sync::{SchemaRegistry, SyncDriver, SyncRunResult};

/// Where records are written
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// SQLite database file (overrides the config file)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Sync into a throwaway in-memory store instead of the database
    #[arg(long)]
    pub dry_run: bool,
}

/// How feeds are interpreted and fetched
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// TOML schema declaration to use instead of the built-in catalogue
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// Content-Type header sent with every request
    #[arg(long)]
    pub format: Option<String>,
}

/// The store a command writes to
pub enum StoreHandle {
    Sqlite(Arc<SqliteStore>),
    Memory(Arc<MemoryStore>),
}

impl StoreHandle {
    pub fn record_store(&self) -> Arc<dyn RecordStore> {
        match self {
            StoreHandle::Sqlite(store) => store.clone(),
            StoreHandle::Memory(store) => store.clone(),
        }
    }

    /// Keep the run in the history; dry runs leave no trace
    pub async fn record_run(&self, result: &SyncRunResult) {
        if let StoreHandle::Sqlite(store) = self {
            if let Err(e) = store.record_run(&result.summary()).await {
                warn!("Failed to record {} run: {:#}", result.entity_type, e);
            }
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            StoreHandle::Sqlite(_) => "database",
            StoreHandle::Memory(_) => "in-memory store (dry run)",
        }
    }
}

/// Built-in catalogue, or the schema file from the flag or the config
pub fn load_registry(config: &AppConfig, engine: &EngineArgs) -> Result<Arc<SchemaRegistry>> {
    let schema_file = engine.schema.as_ref().or(config.sync.schema_file.as_ref());

    let registry = match schema_file {
        Some(path) => {
            info!("Loading schemas from {}", path.display());
            SchemaRegistry::from_file(path)
                .with_context(|| format!("Invalid schema file: {}", path.display()))?
        }
        None => airwatch_registry().context("Built-in schema catalogue is invalid")?,
    };

    Ok(Arc::new(registry))
}

pub async fn open_store(config: &AppConfig, args: &StoreArgs) -> Result<StoreHandle> {
    if args.dry_run {
        info!("Dry run: records are written to an in-memory store");
        return Ok(StoreHandle::Memory(Arc::new(MemoryStore::new())));
    }

    let path = args.db.clone().unwrap_or_else(|| config.database_path());
    info!("Using database {}", path.display());
    let store = SqliteStore::open(&path).await?;
    Ok(StoreHandle::Sqlite(Arc::new(store)))
}

pub fn build_driver(
    config: &AppConfig,
    engine: &EngineArgs,
    registry: Arc<SchemaRegistry>,
    store: &StoreHandle,
) -> Result<SyncDriver> {
    let mut fetch = config.fetch.clone();
    if let Some(format) = &engine.format {
        fetch.content_type = format.clone();
    }

    let client = FeedClient::new(fetch)?;
    Ok(SyncDriver::new(registry, Arc::new(client), store.record_store())
        .with_max_depth(config.sync.max_depth))
}

/// Parse `--url-args` (a flat JSON object) into query parameters
pub fn parse_url_args(raw: &str) -> Result<BTreeMap<String, String>> {
    let value: Value = serde_json::from_str(raw).context("--url-args is not valid JSON")?;
    let Value::Object(map) = value else {
        anyhow::bail!("--url-args must be a JSON object");
    };

    let mut params = BTreeMap::new();
    for (key, value) in map {
        let rendered = match value {
            Value::Null => continue,
            Value::String(s) => s,
            Value::Bool(_) | Value::Number(_) => value.to_string(),
            Value::Array(_) | Value::Object(_) => {
                anyhow::bail!("--url-args value for '{}' must be a scalar", key)
            }
        };
        params.insert(key, rendered);
    }

    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_args() {
        let params =
            parse_url_args(r#"{"siteId": 10001, "monitorId": "PM10", "all": true, "x": null}"#)
                .unwrap();

        assert_eq!(params.len(), 3);
        assert_eq!(params["siteId"], "10001");
        assert_eq!(params["monitorId"], "PM10");
        assert_eq!(params["all"], "true");
    }

    #[test]
    fn test_parse_url_args_rejects_non_objects() {
        assert!(parse_url_args("[1, 2]").is_err());
        assert!(parse_url_args("not json").is_err());
        assert!(parse_url_args(r#"{"a": [1]}"#).is_err());
    }

    #[test]
    fn test_load_registry_defaults_to_catalogue() {
        let registry = load_registry(&AppConfig::default(), &EngineArgs::default()).unwrap();
        assert_eq!(registry.len(), 9);
    }

    #[tokio::test]
    async fn test_dry_run_uses_memory_store() {
        let args = StoreArgs {
            db: None,
            dry_run: true,
        };
        let store = open_store(&AppConfig::default(), &args).await.unwrap();
        assert!(matches!(store, StoreHandle::Memory(_)));
    }
}
