//! Application configuration
//!
//! Read from `$AQI_SYNC_CONFIG` or `<config dir>/aqi-sync/config.toml`.
//! Every section is optional; command-line flags win over file values.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::api::{ConcurrencyConfig, FetchConfig};
use crate::sync::DEFAULT_MAX_DEPTH;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "AQI_SYNC_CONFIG";

const APP_DIR: &str = "aqi-sync";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub fetch: FetchConfig,
    pub sync: SyncConfig,
    /// Endpoint overrides keyed by entity type
    pub endpoints: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; defaults to `<data dir>/aqi-sync/aqi.db`
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Entity types `sync-all` runs at the same time
    pub jobs: usize,
    /// Levels of nested relations resolved below a primary record
    pub max_depth: usize,
    /// TOML schema declaration used instead of the built-in catalogue
    pub schema_file: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            max_depth: DEFAULT_MAX_DEPTH,
            schema_file: None,
        }
    }
}

impl AppConfig {
    /// Load the config file, falling back to defaults when the default
    /// location has no file. An explicitly named file must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let required = explicit.is_some() || from_env.is_some();

        let path = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => path,
            None => match default_config_path() {
                Some(path) => path,
                None => {
                    debug!("No config directory on this platform, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            if required {
                anyhow::bail!("Config file does not exist: {}", path.display());
            }
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid config")
    }

    /// Database file to open
    pub fn database_path(&self) -> PathBuf {
        self.database.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("aqi.db")
        })
    }

    /// Configured endpoint for an entity type, if overridden
    pub fn endpoint_for(&self, entity_type: &str) -> Option<&str> {
        self.endpoints
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(entity_type))
            .map(|(_, url)| url.as_str())
    }

    /// Scheduling limits for `sync-all`
    pub fn concurrency(&self, jobs: Option<usize>) -> ConcurrencyConfig {
        ConcurrencyConfig {
            max_concurrent_runs: jobs.unwrap_or(self.sync.jobs).max(1),
            enabled: true,
        }
    }
}

/// `<config dir>/aqi-sync/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}
