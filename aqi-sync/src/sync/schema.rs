//! Declarative entity schemas
//!
//! An [`EntitySchema`] tells the engine everything it needs to reconcile one
//! entity type: which source keys map to which stored attributes, which of
//! them form the natural key, which keys hold nested entities, and (for
//! top-level feeds) where to fetch the data and how the envelope is shaped.

use serde::{Deserialize, Serialize};

use super::error::SchemaError;

/// How a nested payload is wired to the record that contains it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Nested entities carry a reference back to the primary record.
    /// They are get-or-created, never updated.
    ChildReferencesParent,
    /// The primary record stores a reference to a single nested entity,
    /// written in a second pass after the nested entity exists.
    ParentReferencesChild,
    /// Order-irrelevant many-to-many association. Payload is either full
    /// sub-entities or bare natural-key scalars.
    ManyToManySet,
}

impl RelationKind {
    /// Get display label
    pub fn label(&self) -> &'static str {
        match self {
            RelationKind::ChildReferencesParent => "child -> parent",
            RelationKind::ParentReferencesChild => "parent -> child",
            RelationKind::ManyToManySet => "many-to-many",
        }
    }

    /// Whether a relation of this kind must name the reference attribute
    pub fn requires_reverse_attr(&self) -> bool {
        match self {
            RelationKind::ChildReferencesParent | RelationKind::ParentReferencesChild => true,
            RelationKind::ManyToManySet => false,
        }
    }
}

/// Mapping of one source key to one stored attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarField {
    /// Key in the upstream JSON
    pub source: String,
    /// Attribute name in the store
    pub attr: String,
}

/// A relation declared on an entity schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Key in the upstream JSON holding the nested payload
    pub source_key: String,
    /// Entity type of the nested payload
    pub target: String,
    pub kind: RelationKind,
    /// Reference attribute:
    /// - `ChildReferencesParent`: attribute on the child pointing at the primary
    /// - `ParentReferencesChild`: attribute on the primary pointing at the child
    /// - `ManyToManySet`: association name (defaults to `source_key`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_attr: Option<String>,
}

impl Relation {
    pub fn new(
        source_key: impl Into<String>,
        target: impl Into<String>,
        kind: RelationKind,
        reverse_attr: Option<String>,
    ) -> Self {
        Relation {
            source_key: source_key.into(),
            target: target.into(),
            kind,
            reverse_attr,
        }
    }

    /// Nested entities that point back at the primary through `reverse_attr`
    pub fn child_references_parent(
        source_key: impl Into<String>,
        target: impl Into<String>,
        reverse_attr: impl Into<String>,
    ) -> Self {
        Relation::new(
            source_key,
            target,
            RelationKind::ChildReferencesParent,
            Some(reverse_attr.into()),
        )
    }

    /// The primary points at one nested entity through `reverse_attr`
    pub fn parent_references_child(
        source_key: impl Into<String>,
        target: impl Into<String>,
        reverse_attr: impl Into<String>,
    ) -> Self {
        Relation::new(
            source_key,
            target,
            RelationKind::ParentReferencesChild,
            Some(reverse_attr.into()),
        )
    }

    /// Many-to-many association stored under `field`
    pub fn many_to_many(
        source_key: impl Into<String>,
        target: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Relation::new(
            source_key,
            target,
            RelationKind::ManyToManySet,
            Some(field.into()),
        )
    }

    /// Name of the many-to-many association this relation writes to
    pub fn association_field(&self) -> &str {
        self.reverse_attr.as_deref().unwrap_or(&self.source_key)
    }
}

/// Where a top-level entity type is fetched from and how its envelope looks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSpec {
    /// Default endpoint; can be overridden per run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Envelope key holding the total entry count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_key: Option<String>,
    /// Envelope key holding the list of entities
    pub entries_key: String,
}

impl FeedSpec {
    pub fn new(
        endpoint: impl Into<String>,
        count_key: impl Into<String>,
        entries_key: impl Into<String>,
    ) -> Self {
        FeedSpec {
            endpoint: Some(endpoint.into()),
            count_key: Some(count_key.into()),
            entries_key: entries_key.into(),
        }
    }
}

/// Schema of one entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity type name (registry key)
    pub name: String,
    /// Storage name, when several schemas write the same kind of record.
    /// Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Source keys forming the natural key
    #[serde(default)]
    pub unique_keys: Vec<String>,
    /// Ordered scalar field mappings
    #[serde(default)]
    pub fields: Vec<ScalarField>,
    /// Ordered relation declarations
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed: Option<FeedSpec>,
}

impl EntitySchema {
    /// Create an empty schema
    pub fn new(name: impl Into<String>) -> Self {
        EntitySchema {
            name: name.into(),
            table: None,
            unique_keys: Vec::new(),
            fields: Vec::new(),
            relations: Vec::new(),
            feed: None,
        }
    }

    /// Store records under a different storage name
    pub fn stored_as(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Add a scalar field mapping
    pub fn field(mut self, source: impl Into<String>, attr: impl Into<String>) -> Self {
        self.fields.push(ScalarField {
            source: source.into(),
            attr: attr.into(),
        });
        self
    }

    /// Set the natural key (source keys)
    pub fn unique<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Add a relation
    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Attach a feed descriptor
    pub fn feed(mut self, feed: FeedSpec) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Storage name for this entity type's records
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    /// Whether this type can be synchronized at the top level
    pub fn is_syncable(&self) -> bool {
        self.feed.is_some()
    }

    /// Find the attribute a source key maps to
    pub fn attr_for(&self, source: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.source == source)
            .map(|f| f.attr.as_str())
    }

    /// Find a relation by source key
    pub fn find_relation(&self, source_key: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.source_key == source_key)
    }

    /// Whether `source` is part of the natural key.
    ///
    /// A schema without declared unique keys is identified by all of its
    /// scalar fields together.
    pub fn is_key_field(&self, source: &str) -> bool {
        if self.unique_keys.is_empty() {
            self.attr_for(source).is_some()
        } else {
            self.unique_keys.iter().any(|k| k == source)
        }
    }

    /// The single attribute bare scalars are matched against, if the natural
    /// key has exactly one column
    pub fn leaf_key_attr(&self) -> Option<&str> {
        match self.unique_keys.as_slice() {
            [only] => self.attr_for(only),
            [] if self.fields.len() == 1 => Some(self.fields[0].attr.as_str()),
            _ => None,
        }
    }

    /// Check the invariants that only involve this schema
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::EmptyName);
        }

        if self.fields.is_empty() {
            return Err(SchemaError::NoFields {
                entity: self.name.clone(),
            });
        }

        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|f| f.source == field.source) {
                return Err(SchemaError::DuplicateField {
                    entity: self.name.clone(),
                    key: field.source.clone(),
                });
            }
        }

        for key in &self.unique_keys {
            if self.attr_for(key).is_none() {
                return Err(SchemaError::UniqueKeyNotMapped {
                    entity: self.name.clone(),
                    key: key.clone(),
                });
            }
        }

        for relation in &self.relations {
            if self.attr_for(&relation.source_key).is_some() {
                return Err(SchemaError::RelationOverlapsField {
                    entity: self.name.clone(),
                    key: relation.source_key.clone(),
                });
            }

            if relation.kind.requires_reverse_attr() && relation.reverse_attr.is_none() {
                return Err(SchemaError::MissingReverseAttr {
                    entity: self.name.clone(),
                    relation: relation.source_key.clone(),
                    kind: relation.kind,
                });
            }
        }

        if let Some(feed) = &self.feed {
            if feed.entries_key.trim().is_empty() {
                return Err(SchemaError::EmptyEntriesKey {
                    entity: self.name.clone(),
                });
            }
        }

        Ok(())
    }
}
