//! Schema-driven entity synchronization
//!
//! The engine pulls one feed at a time through a [`crate::api::Fetcher`],
//! splits each entry by its [`EntitySchema`], upserts it through a
//! [`crate::store::RecordStore`] and hands the raw entry to the
//! [`RelationResolver`] to wire nested entities.

pub mod catalog;
pub mod driver;
pub mod error;
pub mod fields;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod result;
pub mod schema;

pub use driver::{SyncDriver, SyncOutcome, SyncRequest};
pub use error::{SchemaError, SyncError};
pub use registry::{SchemaDocument, SchemaRegistry, SchemaRegistryBuilder};
pub use resolver::{DEFAULT_MAX_DEPTH, RelationResolver};
pub use result::{FailureScope, SyncFailure, SyncRunResult};
pub use schema::{EntitySchema, FeedSpec, Relation, RelationKind, ScalarField};
