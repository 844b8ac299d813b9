//! Relation resolution
//!
//! After the driver has upserted a primary record, the resolver walks the
//! relations declared on its schema, materializes the nested entities found
//! in the raw entry and wires them to the primary according to the relation
//! kind. Nested entities are always get-or-created, so an entity that is
//! owned elsewhere is never overwritten from a nested payload.

use futures::FutureExt;
use futures::future::BoxFuture;
use log::{debug, warn};
use serde_json::{Map, Value};
use std::sync::Arc;

use super::error::{SchemaError, SyncError};
use super::fields::{NestedEntry, SplitFields, leaf_key, normalize_payload, split_fields};
use super::registry::SchemaRegistry;
use super::result::SyncFailure;
use super::schema::{EntitySchema, Relation, RelationKind};
use crate::store::{FieldValue, LinkTarget, Record, RecordStore};

/// Levels of nested relations resolved below a primary record
pub const DEFAULT_MAX_DEPTH: usize = 4;

/// Walks relations of upserted records and wires nested entities
#[derive(Clone)]
pub struct RelationResolver {
    registry: Arc<SchemaRegistry>,
    store: Arc<dyn RecordStore>,
    max_depth: usize,
}

/// One relation of one record being resolved
struct RelationScope<'a> {
    primary: &'a Record,
    schema: &'a EntitySchema,
    relation: &'a Relation,
    target: &'a EntitySchema,
    depth: usize,
}

impl RelationScope<'_> {
    fn failure(&self, message: impl Into<String>) -> SyncFailure {
        SyncFailure::relation(
            &self.schema.name,
            self.primary.describe_key(),
            &self.relation.source_key,
            &self.target.name,
            message,
        )
    }

    /// Only many-to-many sets can link a bare natural-key value
    fn leaf_failure(&self, value: &Value) -> SyncFailure {
        self.failure(format!(
            "bare value {} cannot be wired as a {} relation",
            value,
            self.relation.kind.label()
        ))
    }

    fn reverse_attr(&self) -> Result<&str, SyncError> {
        self.relation.reverse_attr.as_deref().ok_or_else(|| {
            SyncError::MalformedSchema(SchemaError::MissingReverseAttr {
                entity: self.schema.name.clone(),
                relation: self.relation.source_key.clone(),
                kind: self.relation.kind,
            })
        })
    }
}

impl RelationResolver {
    pub fn new(registry: Arc<SchemaRegistry>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            registry,
            store,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Resolve every relation of `primary` present in `entry`.
    ///
    /// Store failures are collected and returned; `Err` is reserved for
    /// schema problems that would affect every record alike.
    pub async fn resolve(
        &self,
        primary: &Record,
        schema: &EntitySchema,
        entry: &Map<String, Value>,
    ) -> Result<Vec<SyncFailure>, SyncError> {
        self.resolve_at_depth(primary, schema, entry, 0).await
    }

    fn resolve_at_depth<'a>(
        &'a self,
        primary: &'a Record,
        schema: &'a EntitySchema,
        entry: &'a Map<String, Value>,
        depth: usize,
    ) -> BoxFuture<'a, Result<Vec<SyncFailure>, SyncError>> {
        async move {
            let mut failures = Vec::new();

            for relation in &schema.relations {
                let payload = match entry.get(&relation.source_key) {
                    Some(payload) if !payload.is_null() => payload,
                    _ => continue,
                };

                let target = self.registry.schema_for(&relation.target)?;
                let scope = RelationScope {
                    primary,
                    schema,
                    relation,
                    target,
                    depth,
                };
                let entries = normalize_payload(payload);

                debug!(
                    "Resolving {} {} ({}) for {} [{}]: {} entries",
                    relation.kind.label(),
                    relation.source_key,
                    target.name,
                    schema.name,
                    primary.describe_key(),
                    entries.len()
                );

                match relation.kind {
                    RelationKind::ChildReferencesParent => {
                        self.wire_children(&scope, &entries, &mut failures).await?
                    }
                    RelationKind::ParentReferencesChild => {
                        self.wire_parent_reference(&scope, &entries, &mut failures)
                            .await?
                    }
                    RelationKind::ManyToManySet => {
                        self.wire_many_to_many(&scope, &entries, &mut failures)
                            .await?
                    }
                }
            }

            Ok(failures)
        }
        .boxed()
    }

    /// Every child gets a reference back to the primary
    async fn wire_children(
        &self,
        scope: &RelationScope<'_>,
        entries: &[NestedEntry<'_>],
        failures: &mut Vec<SyncFailure>,
    ) -> Result<(), SyncError> {
        let attr = scope.reverse_attr()?;

        for entry in entries {
            let fields = match entry {
                NestedEntry::Entity(fields) => fields,
                NestedEntry::Leaf(value) => {
                    failures.push(scope.leaf_failure(value));
                    continue;
                }
            };

            self.materialize(scope, fields, Some((attr, scope.primary.reference())), failures)
                .await?;
        }

        Ok(())
    }

    /// The primary gets a reference to its single child, written after the
    /// child exists. Every entry past the first is recorded as its own
    /// failure and left untouched.
    async fn wire_parent_reference(
        &self,
        scope: &RelationScope<'_>,
        entries: &[NestedEntry<'_>],
        failures: &mut Vec<SyncFailure>,
    ) -> Result<(), SyncError> {
        let attr = scope.reverse_attr()?;

        let Some(first) = entries.first() else {
            return Ok(());
        };

        for position in 2..=entries.len() {
            failures.push(scope.failure(format!(
                "entry {} of {} not referenced; only the first is",
                position,
                entries.len()
            )));
        }

        let fields = match first {
            NestedEntry::Entity(fields) => fields,
            NestedEntry::Leaf(value) => {
                failures.push(scope.leaf_failure(value));
                return Ok(());
            }
        };

        let Some(child) = self.materialize(scope, fields, None, failures).await? else {
            return Ok(());
        };

        if let Err(e) = self
            .store
            .set_attribute_and_persist(scope.primary, attr, &child)
            .await
        {
            warn!(
                "Failed to point {} [{}].{} at {}: {}",
                scope.schema.name,
                scope.primary.describe_key(),
                attr,
                child.describe_key(),
                e
            );
            failures.push(scope.failure(e.to_string()));
        }

        Ok(())
    }

    /// Union every sub-entity or bare key into the primary's association
    async fn wire_many_to_many(
        &self,
        scope: &RelationScope<'_>,
        entries: &[NestedEntry<'_>],
        failures: &mut Vec<SyncFailure>,
    ) -> Result<(), SyncError> {
        let mut targets = Vec::with_capacity(entries.len());

        for entry in entries {
            match entry {
                NestedEntry::Entity(fields) => {
                    if let Some(record) = self.materialize(scope, fields, None, failures).await? {
                        targets.push(LinkTarget::Record(record));
                    }
                }
                NestedEntry::Leaf(value) => match leaf_key(scope.target, value) {
                    Ok(key) => targets.push(LinkTarget::Key {
                        entity_type: scope.target.table_name().to_string(),
                        key,
                    }),
                    Err(e) => failures.push(scope.failure(e.to_string())),
                },
            }
        }

        if targets.is_empty() {
            return Ok(());
        }

        let field = scope.relation.association_field();
        match self
            .store
            .union_many_to_many(scope.primary, field, &targets)
            .await
        {
            Ok(rejections) => {
                for rejection in rejections {
                    warn!(
                        "{} [{}].{}: {} not linked: {}",
                        scope.schema.name,
                        scope.primary.describe_key(),
                        field,
                        rejection.target.describe(),
                        rejection.reason
                    );
                    failures.push(scope.failure(format!(
                        "{}: {}",
                        rejection.target.describe(),
                        rejection.reason
                    )));
                }
            }
            Err(e) => {
                warn!(
                    "Failed to update {} [{}].{}: {}",
                    scope.schema.name,
                    scope.primary.describe_key(),
                    field,
                    e
                );
                failures.push(scope.failure(e.to_string()));
            }
        }

        Ok(())
    }

    /// Get-or-create one nested entity and resolve its own relations
    async fn materialize(
        &self,
        scope: &RelationScope<'_>,
        fields: &Map<String, Value>,
        back_reference: Option<(&str, FieldValue)>,
        failures: &mut Vec<SyncFailure>,
    ) -> Result<Option<Record>, SyncError> {
        let SplitFields {
            unique,
            mut defaults,
        } = match split_fields(scope.target, fields) {
            Ok(split) => split,
            Err(e) => {
                failures.push(scope.failure(e.to_string()));
                return Ok(None);
            }
        };

        if let Some((attr, reference)) = back_reference {
            defaults.insert(attr.to_string(), reference);
        }

        let record = match self
            .store
            .get_or_create(scope.target.table_name(), unique, defaults)
            .await
        {
            Ok((record, created)) => {
                debug!(
                    "{} {} [{}]",
                    if created { "Created" } else { "Found" },
                    scope.target.name,
                    record.describe_key()
                );
                record
            }
            Err(e) => {
                warn!(
                    "Failed to materialize {} for {} [{}]: {}",
                    scope.target.name,
                    scope.schema.name,
                    scope.primary.describe_key(),
                    e
                );
                failures.push(scope.failure(e.to_string()));
                return Ok(None);
            }
        };

        let has_nested = scope
            .target
            .relations
            .iter()
            .any(|r| fields.get(&r.source_key).is_some_and(|v| !normalize_payload(v).is_empty()));

        if has_nested {
            if scope.depth + 1 >= self.max_depth {
                failures.push(scope.failure(format!(
                    "relations nested more than {} levels deep are not resolved",
                    self.max_depth
                )));
            } else {
                let nested = self
                    .resolve_at_depth(&record, scope.target, fields, scope.depth + 1)
                    .await?;
                failures.extend(nested);
            }
        }

        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::store::memory::testing::{FlakyStore, StoreOp};
    use crate::sync::result::FailureScope;
    use crate::sync::schema::FeedSpec;
    use serde_json::json;

    fn scalar(value: Value) -> FieldValue {
        FieldValue::Scalar(value)
    }

    fn registry() -> Arc<SchemaRegistry> {
        let registry = SchemaRegistry::builder()
            .register(
                EntitySchema::new("Region")
                    .field("Code", "code")
                    .field("Label", "label")
                    .unique(["Code"])
                    .relation(Relation::many_to_many("Zones", "Zone", "zones"))
                    .relation(Relation::child_references_parent("Notes", "Note", "region"))
                    .relation(Relation::parent_references_child(
                        "Capital", "City", "capital",
                    ))
                    .feed(FeedSpec::new("http://example.test/regions", "Count", "Regions")),
            )
            .register(
                EntitySchema::new("Zone")
                    .field("ZoneId", "zone_id")
                    .field("Name", "name")
                    .unique(["ZoneId"])
                    .relation(Relation::many_to_many("Districts", "District", "districts")),
            )
            .register(
                EntitySchema::new("District")
                    .field("Name", "name")
                    .relation(Relation::many_to_many("Zones", "Zone", "zones")),
            )
            .register(EntitySchema::new("Note").field("Text", "text"))
            .register(
                EntitySchema::new("City")
                    .field("CityId", "city_id")
                    .field("Name", "name")
                    .unique(["CityId"]),
            )
            .build()
            .unwrap();
        Arc::new(registry)
    }

    async fn primary(store: &MemoryStore, code: &str) -> Record {
        let mut unique = crate::store::FieldMap::new();
        unique.insert("code".to_string(), scalar(json!(code)));
        store.upsert("Region", unique, Default::default()).await.unwrap().0
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_child_references_parent() {
        let registry = registry();
        let store = Arc::new(MemoryStore::new());
        let resolver = RelationResolver::new(registry.clone(), store.clone());
        let region = primary(&store, "N").await;

        let entry = object(json!({"Code": "N", "Notes": [{"Text": "a"}, {"Text": "b"}]}));
        let failures = resolver
            .resolve(&region, registry.schema_for("Region").unwrap(), &entry)
            .await
            .unwrap();

        assert!(failures.is_empty());
        let notes = store.records_of("Note");
        assert_eq!(notes.len(), 2);
        assert!(notes.iter().all(|n| n.field("region") == Some(&region.reference())));
    }

    #[tokio::test]
    async fn test_parent_references_child_extra_entries() {
        let registry = registry();
        let store = Arc::new(MemoryStore::new());
        let resolver = RelationResolver::new(registry.clone(), store.clone());
        let region = primary(&store, "N").await;

        let entry = object(json!({
            "Code": "N",
            "Capital": [
                {"CityId": 1, "Name": "One"},
                {"CityId": 2, "Name": "Two"},
                {"CityId": 3, "Name": "Three"}
            ]
        }));
        let failures = resolver
            .resolve(&region, registry.schema_for("Region").unwrap(), &entry)
            .await
            .unwrap();

        assert_eq!(failures.len(), 2);
        assert!(failures[0].message.starts_with("entry 2 of 3"));
        assert!(failures[1].message.starts_with("entry 3 of 3"));
        assert_eq!(store.records_of("City").len(), 1);

        let stored = store.find("Region", &region.key).unwrap();
        let capital = stored.field("capital").and_then(FieldValue::as_reference);
        assert_eq!(capital, Some(store.records_of("City")[0].id));
    }

    #[tokio::test]
    async fn test_leaf_payload_rejected_for_reference_kinds() {
        let registry = registry();
        let store = Arc::new(MemoryStore::new());
        let resolver = RelationResolver::new(registry.clone(), store.clone());
        let region = primary(&store, "N").await;

        let entry = object(json!({"Code": "N", "Capital": 7, "Notes": ["x"]}));
        let failures = resolver
            .resolve(&region, registry.schema_for("Region").unwrap(), &entry)
            .await
            .unwrap();

        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(SyncFailure::is_relation));
        assert_eq!(store.records_of("City").len(), 0);
    }

    #[tokio::test]
    async fn test_many_to_many_leaf_and_entity_members() {
        let registry = registry();
        let store = Arc::new(MemoryStore::new());
        let resolver = RelationResolver::new(registry.clone(), store.clone());
        let region = primary(&store, "N").await;
        let schema = registry.schema_for("Region").unwrap();

        let entry = object(json!({"Code": "N", "Zones": [{"ZoneId": 1, "Name": "Inner"}]}));
        assert!(resolver.resolve(&region, schema, &entry).await.unwrap().is_empty());

        // 1 exists now, 99 does not
        let entry = object(json!({"Code": "N", "Zones": [1, 99]}));
        let failures = resolver.resolve(&region, schema, &entry).await.unwrap();

        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("zone_id=99"));
        assert_eq!(store.links_of(region.id, "zones").len(), 1);
    }

    #[tokio::test]
    async fn test_nested_relations_are_resolved_recursively() {
        let registry = registry();
        let store = Arc::new(MemoryStore::new());
        let resolver = RelationResolver::new(registry.clone(), store.clone());
        let region = primary(&store, "N").await;

        let entry = object(json!({
            "Code": "N",
            "Zones": [{"ZoneId": 1, "Name": "Inner", "Districts": [{"Name": "Central"}]}]
        }));
        let failures = resolver
            .resolve(&region, registry.schema_for("Region").unwrap(), &entry)
            .await
            .unwrap();

        assert!(failures.is_empty());
        let zone = &store.records_of("Zone")[0];
        let district = &store.records_of("District")[0];
        assert_eq!(store.links_of(zone.id, "districts").into_iter().collect::<Vec<_>>(), vec![district.id]);
    }

    #[tokio::test]
    async fn test_nesting_depth_is_bounded() {
        let registry = registry();
        let store = Arc::new(MemoryStore::new());
        let resolver = RelationResolver::new(registry.clone(), store.clone()).with_max_depth(2);
        let region = primary(&store, "N").await;

        // Region -> Zone -> District -> Zone: the third level is cut off
        let entry = object(json!({
            "Code": "N",
            "Zones": [{
                "ZoneId": 1,
                "Districts": [{"Name": "Central", "Zones": [{"ZoneId": 2}]}]
            }]
        }));
        let failures = resolver
            .resolve(&region, registry.schema_for("Region").unwrap(), &entry)
            .await
            .unwrap();

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].entity_type, "Zone");
        assert!(failures[0].message.contains("2 levels"));
        assert_eq!(store.records_of("District").len(), 1);
        assert_eq!(store.records_of("Zone").len(), 1);
    }

    #[tokio::test]
    async fn test_empty_nested_list_at_depth_limit_is_not_a_failure() {
        let registry = registry();
        let store = Arc::new(MemoryStore::new());
        let resolver = RelationResolver::new(registry.clone(), store.clone()).with_max_depth(2);
        let region = primary(&store, "N").await;

        let entry = object(json!({
            "Code": "N",
            "Zones": [{"ZoneId": 1, "Districts": [{"Name": "Central", "Zones": []}]}]
        }));
        let failures = resolver
            .resolve(&region, registry.schema_for("Region").unwrap(), &entry)
            .await
            .unwrap();

        assert!(failures.is_empty(), "{:?}", failures);
        assert_eq!(store.records_of("District").len(), 1);
    }

    #[tokio::test]
    async fn test_union_error_becomes_relation_failure() {
        let registry = registry();
        let store = Arc::new(FlakyStore::new().failing(StoreOp::Union, "Region", "code=N"));
        let resolver = RelationResolver::new(registry.clone(), store.clone());
        let region = primary(&store, "N").await;

        let entry = object(json!({
            "Code": "N",
            "Zones": [{"ZoneId": 1, "Name": "Inner"}],
            "Notes": [{"Text": "a"}]
        }));
        let failures = resolver
            .resolve(&region, registry.schema_for("Region").unwrap(), &entry)
            .await
            .unwrap();

        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("simulated Union failure"));
        // The zone was materialized before the union was refused
        assert_eq!(store.records_of("Zone").len(), 1);
        assert!(store.links_of(region.id, "zones").is_empty());
        assert_eq!(store.records_of("Note").len(), 1);
    }

    #[tokio::test]
    async fn test_get_or_create_error_skips_only_that_child() {
        let registry = registry();
        let store = Arc::new(FlakyStore::new().failing(StoreOp::GetOrCreate, "City", "city_id=1"));
        let resolver = RelationResolver::new(registry.clone(), store.clone());
        let region = primary(&store, "N").await;

        let entry = object(json!({
            "Code": "N",
            "Capital": {"CityId": 1, "Name": "One"},
            "Zones": [{"ZoneId": 1, "Name": "Inner"}]
        }));
        let failures = resolver
            .resolve(&region, registry.schema_for("Region").unwrap(), &entry)
            .await
            .unwrap();

        assert_eq!(failures.len(), 1);
        assert_eq!(
            failures[0].scope,
            FailureScope::Relation {
                source_key: "Capital".to_string(),
                target: "City".to_string(),
            }
        );
        assert!(store.records_of("City").is_empty());
        let stored = store.find("Region", &region.key).unwrap();
        assert!(stored.field("capital").is_none());
        assert_eq!(store.links_of(region.id, "zones").len(), 1);
    }

    #[tokio::test]
    async fn test_null_and_absent_relations_are_skipped() {
        let registry = registry();
        let store = Arc::new(MemoryStore::new());
        let resolver = RelationResolver::new(registry.clone(), store.clone());
        let region = primary(&store, "N").await;

        let entry = object(json!({"Code": "N", "Zones": null, "Capital": []}));
        let failures = resolver
            .resolve(&region, registry.schema_for("Region").unwrap(), &entry)
            .await
            .unwrap();

        assert!(failures.is_empty());
        assert_eq!(store.record_count(), 1);
        assert_eq!(store.link_count(), 0);
    }
}
