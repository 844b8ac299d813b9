//! Turning raw upstream JSON into store field maps

use serde_json::{Map, Value};

use super::schema::EntitySchema;
use crate::store::{FieldMap, FieldValue};

/// One normalized element of a relation payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NestedEntry<'a> {
    /// A full sub-entity
    Entity(&'a Map<String, Value>),
    /// A bare scalar standing for the target's natural key
    Leaf(&'a Value),
}

impl NestedEntry<'_> {
    pub fn is_leaf(&self) -> bool {
        matches!(self, NestedEntry::Leaf(_))
    }
}

/// Why a raw entry could not be turned into field maps
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EntryError {
    #[error("entry is not a JSON object")]
    NotAnObject,
    #[error("unique key '{0}' is missing or null")]
    MissingUniqueKey(String),
    #[error("'{0}' has no single-column natural key to match bare values against")]
    NoLeafKey(String),
    #[error("bare value {0} is not a scalar")]
    NotAScalar(String),
}

/// Natural-key fields and the rest
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitFields {
    pub unique: FieldMap,
    pub defaults: FieldMap,
}

/// Normalize a relation payload into a list of entries.
///
/// A single object becomes a one-element list, lists are kept in order,
/// scalars (in a list or on their own) become leaf entries. Nulls are dropped.
pub fn normalize_payload(payload: &Value) -> Vec<NestedEntry<'_>> {
    match payload {
        Value::Null => Vec::new(),
        Value::Object(map) => vec![NestedEntry::Entity(map)],
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| match item {
                Value::Object(map) => NestedEntry::Entity(map),
                other => NestedEntry::Leaf(other),
            })
            .collect(),
        scalar => vec![NestedEntry::Leaf(scalar)],
    }
}

/// Split a raw entity into `(unique, defaults)` according to its schema.
///
/// Missing non-key fields are stored as null, so a feed that stops sending
/// an optional field clears it on the next upsert.
pub fn split_fields(schema: &EntitySchema, entry: &Map<String, Value>) -> Result<SplitFields, EntryError> {
    let mut split = SplitFields::default();

    for field in &schema.fields {
        let value = entry.get(&field.source).cloned().unwrap_or(Value::Null);

        if schema.is_key_field(&field.source) {
            let declared = schema.unique_keys.iter().any(|k| k == &field.source);
            if declared && value.is_null() {
                return Err(EntryError::MissingUniqueKey(field.source.clone()));
            }
            split.unique.insert(field.attr.clone(), FieldValue::Scalar(value));
        } else {
            split.defaults.insert(field.attr.clone(), FieldValue::Scalar(value));
        }
    }

    Ok(split)
}

/// Same as [`split_fields`] for a value that may not be an object
pub fn split_value(schema: &EntitySchema, entry: &Value) -> Result<SplitFields, EntryError> {
    match entry {
        Value::Object(map) => split_fields(schema, map),
        _ => Err(EntryError::NotAnObject),
    }
}

/// Natural key of the target for a bare leaf value
pub fn leaf_key(schema: &EntitySchema, value: &Value) -> Result<FieldMap, EntryError> {
    if value.is_object() || value.is_array() {
        return Err(EntryError::NotAScalar(value.to_string()));
    }

    let attr = schema
        .leaf_key_attr()
        .ok_or_else(|| EntryError::NoLeafKey(schema.name.clone()))?;

    let mut key = FieldMap::new();
    key.insert(attr.to_string(), FieldValue::Scalar(value.clone()));
    Ok(key)
}

/// Best-effort rendering of an entry's natural key for failure reports
pub fn key_hint(schema: &EntitySchema, entry: &Value) -> String {
    let Some(map) = entry.as_object() else {
        return entry.to_string();
    };

    schema
        .fields
        .iter()
        .filter(|f| schema.is_key_field(&f.source))
        .map(|f| {
            let value = map.get(&f.source).unwrap_or(&Value::Null);
            match value {
                Value::String(s) => format!("{}={}", f.attr, s),
                other => format!("{}={}", f.attr, other),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
