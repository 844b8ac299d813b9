//! Error taxonomy for the sync engine
//!
//! Only fatal conditions are represented as errors. Record and relation
//! level problems are collected into [`super::SyncFailure`] values instead.

use crate::api::FetchError;

use super::schema::RelationKind;

/// Schema declaration problems, detected before any I/O
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("entity type name must not be empty")]
    EmptyName,

    #[error("entity type '{0}' is declared more than once")]
    DuplicateEntityType(String),

    #[error("entity type '{entity}' declares no scalar fields")]
    NoFields { entity: String },

    #[error("entity type '{entity}' maps source key '{key}' more than once")]
    DuplicateField { entity: String, key: String },

    #[error("entity type '{entity}': unique key '{key}' is not a mapped scalar field")]
    UniqueKeyNotMapped { entity: String, key: String },

    #[error("entity type '{entity}': relation key '{key}' is also mapped as a scalar field")]
    RelationOverlapsField { entity: String, key: String },

    #[error("entity type '{entity}': relation '{relation}' targets unknown entity type '{target}'")]
    UnknownRelationTarget {
        entity: String,
        relation: String,
        target: String,
    },

    #[error("entity type '{entity}': {} relation '{relation}' needs a reverse attribute", .kind.label())]
    MissingReverseAttr {
        entity: String,
        relation: String,
        kind: RelationKind,
    },

    #[error("entity type '{entity}': feed entries key must not be empty")]
    EmptyEntriesKey { entity: String },

    #[error("failed to read schema file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse schema declaration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Fatal errors that abort a sync run
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("unknown entity type '{0}'")]
    UnknownEntityType(String),

    #[error("malformed schema: {0}")]
    MalformedSchema(#[from] SchemaError),

    #[error("entity type '{0}' has no feed endpoint; pass one explicitly")]
    NotSyncable(String),

    #[error("fetching {entity_type} failed: {source}")]
    FetchFailed {
        entity_type: String,
        #[source]
        source: FetchError,
    },

    #[error("unexpected {entity_type} response: {reason}")]
    MalformedEnvelope { entity_type: String, reason: String },
}

impl SyncError {
    /// Whether this error came from the upstream feed rather than configuration
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            SyncError::FetchFailed { .. } | SyncError::MalformedEnvelope { .. }
        )
    }

    /// HTTP status carried by a fetch failure
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::FetchFailed { source, .. } => source.status(),
            _ => None,
        }
    }
}
