//! Record store layer
//!
//! The sync engine never talks to a database directly. It goes through the
//! [`RecordStore`] trait, which exposes the four primitives the engine needs:
//! update-or-create, get-or-create, a single reference write, and a
//! many-to-many union. Two backends are provided:
//!
//! - [`SqliteStore`]: the persistent backend (sqlx + SQLite)
//! - [`MemoryStore`]: an in-process backend used for dry runs and tests

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{EntityCounts, RunSummary, SqliteStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field name -> value. Ordered so that natural keys serialize canonically.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Store-assigned identifier of a persisted record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reference from one record to another, stored inside a field payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordRef {
    #[serde(rename = "$type")]
    pub entity_type: String,
    #[serde(rename = "$ref")]
    pub id: RecordId,
}

/// A stored field value
///
/// Scalars are kept exactly as the upstream feed delivered them. References
/// are written by the relation resolver for the two foreign-key relation kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Reference(RecordRef),
    Scalar(serde_json::Value),
}

impl FieldValue {
    /// Get the referenced record id, if this is a reference
    pub fn as_reference(&self) -> Option<RecordId> {
        match self {
            FieldValue::Reference(r) => Some(r.id),
            FieldValue::Scalar(_) => None,
        }
    }

    /// Get the raw JSON value, if this is a scalar
    pub fn as_scalar(&self) -> Option<&serde_json::Value> {
        match self {
            FieldValue::Scalar(v) => Some(v),
            FieldValue::Reference(_) => None,
        }
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        FieldValue::Scalar(value)
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Reference(r) => write!(f, "{}{}", r.entity_type, r.id),
            FieldValue::Scalar(serde_json::Value::String(s)) => write!(f, "{}", s),
            FieldValue::Scalar(v) => write!(f, "{}", v),
        }
    }
}

/// Handle to one persisted record, identified by its natural key
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    /// Storage name of the entity type
    pub entity_type: String,
    /// Natural key values (target attribute names)
    pub key: FieldMap,
}

impl Record {
    /// Build a reference value pointing at this record
    pub fn reference(&self) -> FieldValue {
        FieldValue::Reference(RecordRef {
            entity_type: self.entity_type.clone(),
            id: self.id,
        })
    }

    /// Human-readable natural key, e.g. `site_id=10001`
    pub fn describe_key(&self) -> String {
        describe_key(&self.key)
    }
}

/// Full stored state of a record, as read back for inspection
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: RecordId,
    pub entity_type: String,
    pub key: FieldMap,
    /// Every stored field, including the key fields
    pub fields: FieldMap,
}

impl StoredRecord {
    /// Get a stored field by attribute name
    pub fn field(&self, attr: &str) -> Option<&FieldValue> {
        self.fields.get(attr)
    }
}

/// Target of a many-to-many link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkTarget {
    /// A record that was just materialized by the resolver
    Record(Record),
    /// A bare natural key (leaf relation); the store looks it up itself
    Key { entity_type: String, key: FieldMap },
}

impl LinkTarget {
    pub fn describe(&self) -> String {
        match self {
            LinkTarget::Record(r) => format!("{}({})", r.entity_type, r.describe_key()),
            LinkTarget::Key { entity_type, key } => {
                format!("{}({})", entity_type, describe_key(key))
            }
        }
    }
}

/// A single many-to-many member the backend refused to link
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRejection {
    pub target: LinkTarget,
    pub reason: String,
}

/// Errors raised by record store primitives
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A reference or link could not be written (missing target, type mismatch,
    /// constraint violation). Recoverable at the relation level.
    #[error("relation integrity error: {0}")]
    RelationIntegrity(String),

    /// The backend itself failed
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Persistence primitives used by the sync engine
///
/// Every operation is scoped to one entity type (its storage name) and one
/// logical record. `upsert` and `get_or_create` must be atomic with respect to
/// the natural key: two concurrent calls with the same key converge on one
/// record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Find the record matching `unique` exactly; overwrite every field in
    /// `defaults` if found, otherwise create it with both field sets.
    /// Returns the record and whether it was created.
    async fn upsert(
        &self,
        entity_type: &str,
        unique: FieldMap,
        defaults: FieldMap,
    ) -> Result<(Record, bool), StoreError>;

    /// Like [`RecordStore::upsert`], but an existing record is left untouched.
    async fn get_or_create(
        &self,
        entity_type: &str,
        unique: FieldMap,
        defaults: FieldMap,
    ) -> Result<(Record, bool), StoreError>;

    /// Point `attr` of an already persisted record at `target` and write it back.
    async fn set_attribute_and_persist(
        &self,
        record: &Record,
        attr: &str,
        target: &Record,
    ) -> Result<(), StoreError>;

    /// Add every target to the named association of `record`.
    ///
    /// Members already present are no-ops. Members the backend rejects are
    /// returned individually; they never undo links written for other members.
    async fn union_many_to_many(
        &self,
        record: &Record,
        field: &str,
        targets: &[LinkTarget],
    ) -> Result<Vec<LinkRejection>, StoreError>;
}

/// Render a field map as `a=1, b=x`
pub fn describe_key(key: &FieldMap) -> String {
    key.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Canonical string form of a natural key, used as the uniqueness arbiter
pub(crate) fn natural_key(key: &FieldMap) -> Result<String, StoreError> {
    serde_json::to_string(key)
        .map_err(|e| StoreError::Backend(anyhow::anyhow!("Failed to encode natural key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_value_reference_round_trip() {
        let value = FieldValue::Reference(RecordRef {
            entity_type: "site".to_string(),
            id: RecordId(7),
        });
        let encoded = serde_json::to_value(&value).unwrap();
        assert_eq!(encoded, json!({"$type": "site", "$ref": 7}));

        let decoded: FieldValue = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.as_reference(), Some(RecordId(7)));
    }

    #[test]
    fn test_field_value_object_with_extra_keys_stays_scalar() {
        let decoded: FieldValue =
            serde_json::from_value(json!({"$ref": 7, "$type": "site", "other": 1})).unwrap();
        assert!(decoded.as_reference().is_none());
        assert!(decoded.as_scalar().is_some());
    }

    #[test]
    fn test_natural_key_is_order_independent() {
        let mut a = FieldMap::new();
        a.insert("site_id".to_string(), json!(1).into());
        a.insert("monitor_id".to_string(), json!("PM10").into());

        let mut b = FieldMap::new();
        b.insert("monitor_id".to_string(), json!("PM10").into());
        b.insert("site_id".to_string(), json!(1).into());

        assert_eq!(natural_key(&a).unwrap(), natural_key(&b).unwrap());
    }

    #[test]
    fn test_describe_key() {
        let mut key = FieldMap::new();
        key.insert("name".to_string(), json!("Melbourne Metro").into());
        key.insert("site_id".to_string(), json!(10001).into());
        assert_eq!(describe_key(&key), "name=Melbourne Metro, site_id=10001");
    }
}
