//! Per-run results

use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::store::RunSummary;

/// What a failure was attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureScope {
    /// The primary record itself could not be upserted
    Record,
    /// One relation of an upserted record could not be (fully) wired
    Relation { source_key: String, target: String },
}

/// A data-level failure recorded during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    /// Entity type of the record the failure belongs to
    pub entity_type: String,
    /// Natural key of that record, rendered
    pub key: String,
    pub scope: FailureScope,
    pub message: String,
}

impl SyncFailure {
    pub fn record(entity_type: impl Into<String>, key: impl Into<String>, message: impl Into<String>) -> Self {
        SyncFailure {
            entity_type: entity_type.into(),
            key: key.into(),
            scope: FailureScope::Record,
            message: message.into(),
        }
    }

    pub fn relation(
        entity_type: impl Into<String>,
        key: impl Into<String>,
        source_key: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        SyncFailure {
            entity_type: entity_type.into(),
            key: key.into(),
            scope: FailureScope::Relation {
                source_key: source_key.into(),
                target: target.into(),
            },
            message: message.into(),
        }
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.scope, FailureScope::Relation { .. })
    }
}

impl std::fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.scope {
            FailureScope::Record => {
                write!(f, "{} [{}]: {}", self.entity_type, self.key, self.message)
            }
            FailureScope::Relation { source_key, target } => write!(
                f,
                "{} [{}] {} -> {}: {}",
                self.entity_type, self.key, source_key, target, self.message
            ),
        }
    }
}

/// Outcome of one `sync_entity_type` invocation
#[derive(Debug, Clone)]
pub struct SyncRunResult {
    pub run_id: Uuid,
    pub entity_type: String,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Entries found in the envelope
    pub fetched: usize,
    /// Count the envelope itself claims, if it has a count key
    pub reported: Option<u64>,
    /// Primary records upserted (created or updated)
    pub upserted: usize,
    /// Of those, newly created
    pub created: usize,
    pub failures: Vec<SyncFailure>,
}

impl SyncRunResult {
    pub(crate) fn new(entity_type: impl Into<String>, url: impl Into<String>) -> Self {
        SyncRunResult {
            run_id: Uuid::new_v4(),
            entity_type: entity_type.into(),
            url: url.into(),
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            fetched: 0,
            reported: None,
            upserted: 0,
            created: 0,
            failures: Vec::new(),
        }
    }

    /// Records updated in place rather than created
    pub fn updated(&self) -> usize {
        self.upserted - self.created
    }

    /// Entries whose primary upsert failed
    pub fn record_failures(&self) -> impl Iterator<Item = &SyncFailure> {
        self.failures.iter().filter(|f| !f.is_relation())
    }

    /// Relation wiring failures
    pub fn relation_failures(&self) -> impl Iterator<Item = &SyncFailure> {
        self.failures.iter().filter(|f| f.is_relation())
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Row for the run history
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            entity_type: self.entity_type.clone(),
            url: self.url.clone(),
            started_at: self.started_at,
            elapsed_ms: i64::try_from(self.elapsed.as_millis()).unwrap_or(i64::MAX),
            fetched: self.fetched as i64,
            upserted: self.upserted as i64,
            created: self.created as i64,
            failures: self.failures.len() as i64,
        }
    }
}
