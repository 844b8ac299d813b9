//! Schema registry
//!
//! Built once at startup, validated as a whole, then shared read-only (behind
//! an `Arc`) by the driver and the relation resolver.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::error::{SchemaError, SyncError};
use super::schema::EntitySchema;

/// Immutable lookup table of entity schemas
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    /// Schemas in declaration order
    schemas: Vec<EntitySchema>,
    /// name -> index into `schemas`
    index: HashMap<String, usize>,
}

/// Schema declaration file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDocument {
    #[serde(rename = "entity", default)]
    pub entities: Vec<EntitySchema>,
}

impl SchemaRegistry {
    /// Start building a registry
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// Parse a TOML schema declaration
    pub fn from_toml_str(content: &str) -> Result<Self, SchemaError> {
        let document: SchemaDocument = toml::from_str(content)?;
        document
            .entities
            .into_iter()
            .fold(Self::builder(), SchemaRegistryBuilder::register)
            .build()
    }

    /// Load a TOML schema declaration file
    pub fn from_file(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Look up the schema of an entity type
    pub fn schema_for(&self, entity_type: &str) -> Result<&EntitySchema, SyncError> {
        self.index
            .get(entity_type)
            .map(|&i| &self.schemas[i])
            .ok_or_else(|| SyncError::UnknownEntityType(entity_type.to_string()))
    }

    /// Resolve a user-supplied type name, ignoring ASCII case
    pub fn canonical_name(&self, input: &str) -> Option<&str> {
        if self.index.contains_key(input) {
            return Some(self.schemas[self.index[input]].name.as_str());
        }
        self.schemas
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(input))
            .map(|s| s.name.as_str())
    }

    /// All schemas, in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &EntitySchema> {
        self.schemas.iter()
    }

    /// Schemas that can be synchronized at the top level, in declaration order
    pub fn syncable(&self) -> impl Iterator<Item = &EntitySchema> {
        self.schemas.iter().filter(|s| s.is_syncable())
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Serialize back into the declaration format
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&SchemaDocument {
            entities: self.schemas.clone(),
        })
    }
}

/// Collects schemas and validates them together
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    schemas: Vec<EntitySchema>,
}

impl SchemaRegistryBuilder {
    /// Add a schema
    pub fn register(mut self, schema: EntitySchema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Validate every schema and the references between them
    pub fn build(self) -> Result<SchemaRegistry, SchemaError> {
        let mut index = HashMap::new();

        for (i, schema) in self.schemas.iter().enumerate() {
            schema.validate()?;
            if index.insert(schema.name.clone(), i).is_some() {
                return Err(SchemaError::DuplicateEntityType(schema.name.clone()));
            }
        }

        for schema in &self.schemas {
            for relation in &schema.relations {
                if !index.contains_key(&relation.target) {
                    return Err(SchemaError::UnknownRelationTarget {
                        entity: schema.name.clone(),
                        relation: relation.source_key.clone(),
                        target: relation.target.clone(),
                    });
                }
            }
        }

        log::debug!("Schema registry built with {} entity types", self.schemas.len());

        Ok(SchemaRegistry {
            schemas: self.schemas,
            index,
        })
    }
}
