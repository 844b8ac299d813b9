//! Schema command handlers

use anyhow::{Context, Result};
use colored::*;
use std::path::PathBuf;

use super::SchemaCommands;
use crate::cli::engine::{EngineArgs, load_registry};
use crate::config::AppConfig;
use crate::sync::{EntitySchema, SchemaDocument, SchemaRegistry};

pub async fn handle_schema_command(command: SchemaCommands, config: &AppConfig) -> Result<()> {
    match command {
        SchemaCommands::List { schema } => {
            let registry = registry_for(config, schema)?;
            list_schemas(&registry)
        }
        SchemaCommands::Show {
            entity_type,
            schema,
        } => {
            let registry = registry_for(config, schema)?;
            show_schema(&registry, &entity_type)
        }
        SchemaCommands::Check { file } => check_schemas(config, file),
    }
}

fn registry_for(config: &AppConfig, schema: Option<PathBuf>) -> Result<std::sync::Arc<SchemaRegistry>> {
    load_registry(
        config,
        &EngineArgs {
            schema,
            format: None,
        },
    )
}

fn list_schemas(registry: &SchemaRegistry) -> Result<()> {
    println!(
        "{:<30} {:<8} {:<10} {}",
        "ENTITY TYPE".bold(),
        "FIELDS".bold(),
        "RELATIONS".bold(),
        "FEED".bold()
    );

    for schema in registry.iter() {
        let feed = schema
            .feed
            .as_ref()
            .and_then(|f| f.endpoint.as_deref())
            .map(|url| url.normal())
            .unwrap_or_else(|| "(nested only)".dimmed());

        println!(
            "{:<30} {:<8} {:<10} {}",
            schema.name.bright_cyan(),
            schema.fields.len(),
            schema.relations.len(),
            feed
        );
    }

    Ok(())
}

fn show_schema(registry: &SchemaRegistry, entity_type: &str) -> Result<()> {
    let name = registry
        .canonical_name(entity_type)
        .ok_or_else(|| anyhow::anyhow!("Unknown entity type '{}'", entity_type))?;
    let schema = registry.schema_for(name)?;

    print!("{}", render_schema(schema)?);

    if let Some(stored_as) = &schema.table {
        println!("{}", format!("# records are shared with {}", stored_as).dimmed());
    }

    Ok(())
}

fn render_schema(schema: &EntitySchema) -> Result<String> {
    toml::to_string_pretty(&SchemaDocument {
        entities: vec![schema.clone()],
    })
    .context("Failed to render schema as TOML")
}

fn check_schemas(config: &AppConfig, file: Option<PathBuf>) -> Result<()> {
    let source = file.or_else(|| config.sync.schema_file.clone());

    let registry = match &source {
        Some(path) => SchemaRegistry::from_file(path)
            .with_context(|| format!("Invalid schema file: {}", path.display()))?,
        None => crate::sync::catalog::airwatch_registry()
            .context("Built-in schema catalogue is invalid")?,
    };

    let label = source
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "built-in catalogue".to_string());

    println!(
        "{} {}: {} entity types, {} with a feed",
        "ok".bright_green().bold(),
        label,
        registry.len(),
        registry.syncable().count()
    );

    Ok(())
}
