//! In-process record store
//!
//! Mirrors the semantics of the SQLite backend without touching disk. Used
//! by `--dry-run` and by the engine's tests, which need to inspect the
//! resulting records and association sets.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{
    FieldMap, LinkRejection, LinkTarget, Record, RecordId, RecordStore, StoreError, StoredRecord,
    natural_key,
};

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    records: BTreeMap<RecordId, StoredRecord>,
    /// (entity_type, natural_key) -> id
    index: HashMap<(String, String), RecordId>,
    /// (record, association field) -> linked records
    links: BTreeMap<(RecordId, String), BTreeSet<RecordId>>,
}

impl MemoryState {
    fn find(&self, entity_type: &str, natural_key: &str) -> Option<RecordId> {
        self.index
            .get(&(entity_type.to_string(), natural_key.to_string()))
            .copied()
    }

    fn insert(&mut self, entity_type: &str, natural_key: String, key: FieldMap, defaults: FieldMap) -> RecordId {
        self.next_id += 1;
        let id = RecordId(self.next_id);

        let mut fields = key.clone();
        fields.extend(defaults);

        self.records.insert(
            id,
            StoredRecord {
                id,
                entity_type: entity_type.to_string(),
                key,
                fields,
            },
        );
        self.index.insert((entity_type.to_string(), natural_key), id);
        id
    }

    fn contains(&self, record: &Record) -> bool {
        self.records
            .get(&record.id)
            .is_some_and(|r| r.entity_type == record.entity_type)
    }
}

/// Record store backed by process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("Memory store lock poisoned")))
    }

    fn write(
        &self,
        entity_type: &str,
        unique: FieldMap,
        defaults: FieldMap,
        overwrite: bool,
    ) -> Result<(Record, bool), StoreError> {
        let natural_key = natural_key(&unique)?;
        let mut state = self.state()?;

        if let Some(id) = state.find(entity_type, &natural_key) {
            if overwrite {
                if let Some(stored) = state.records.get_mut(&id) {
                    stored.fields.extend(defaults);
                }
            }
            return Ok((
                Record {
                    id,
                    entity_type: entity_type.to_string(),
                    key: unique,
                },
                false,
            ));
        }

        let id = state.insert(entity_type, natural_key, unique.clone(), defaults);
        Ok((
            Record {
                id,
                entity_type: entity_type.to_string(),
                key: unique,
            },
            true,
        ))
    }

    /// All records of one entity type, in creation order
    pub fn records_of(&self, entity_type: &str) -> Vec<StoredRecord> {
        self.state
            .lock()
            .map(|state| {
                state
                    .records
                    .values()
                    .filter(|r| r.entity_type == entity_type)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Find a record by natural key
    pub fn find(&self, entity_type: &str, key: &FieldMap) -> Option<StoredRecord> {
        let natural_key = natural_key(key).ok()?;
        let state = self.state.lock().ok()?;
        let id = state.find(entity_type, &natural_key)?;
        state.records.get(&id).cloned()
    }

    /// Members of one association of a record
    pub fn links_of(&self, record: RecordId, field: &str) -> BTreeSet<RecordId> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.links.get(&(record, field.to_string())).cloned())
            .unwrap_or_default()
    }

    /// Total number of records across all entity types
    pub fn record_count(&self) -> usize {
        self.state.lock().map(|s| s.records.len()).unwrap_or(0)
    }

    /// Total number of association edges
    pub fn link_count(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.links.values().map(BTreeSet::len).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert(
        &self,
        entity_type: &str,
        unique: FieldMap,
        defaults: FieldMap,
    ) -> Result<(Record, bool), StoreError> {
        self.write(entity_type, unique, defaults, true)
    }

    async fn get_or_create(
        &self,
        entity_type: &str,
        unique: FieldMap,
        defaults: FieldMap,
    ) -> Result<(Record, bool), StoreError> {
        self.write(entity_type, unique, defaults, false)
    }

    async fn set_attribute_and_persist(
        &self,
        record: &Record,
        attr: &str,
        target: &Record,
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;

        if !state.contains(target) {
            return Err(StoreError::RelationIntegrity(format!(
                "{} {} does not exist",
                target.entity_type, target.id
            )));
        }

        let stored = state.records.get_mut(&record.id).ok_or_else(|| {
            StoreError::RelationIntegrity(format!(
                "{} {} does not exist",
                record.entity_type, record.id
            ))
        })?;
        stored.fields.insert(attr.to_string(), target.reference());
        Ok(())
    }

    async fn union_many_to_many(
        &self,
        record: &Record,
        field: &str,
        targets: &[LinkTarget],
    ) -> Result<Vec<LinkRejection>, StoreError> {
        let mut state = self.state()?;

        if !state.contains(record) {
            return Err(StoreError::RelationIntegrity(format!(
                "{} {} does not exist",
                record.entity_type, record.id
            )));
        }

        let mut rejections = Vec::new();
        let mut resolved = Vec::with_capacity(targets.len());

        for target in targets {
            let id = match target {
                LinkTarget::Record(r) if state.contains(r) => Some(r.id),
                LinkTarget::Record(_) => None,
                LinkTarget::Key { entity_type, key } => {
                    let natural_key = natural_key(key)?;
                    state.find(entity_type, &natural_key)
                }
            };

            match id {
                Some(id) => resolved.push(id),
                None => rejections.push(LinkRejection {
                    target: target.clone(),
                    reason: "no such record".to_string(),
                }),
            }
        }

        state
            .links
            .entry((record.id, field.to_string()))
            .or_default()
            .extend(resolved);

        Ok(rejections)
    }
}
