//! In-memory storage backend.
//!
//! Thread-safe implementations of the storage traits for embedded use and
//! tests. Derived tables are built outside the lock and published by swapping
//! an `Arc` under a short write lock, so readers holding the previous
//! snapshot are never disturbed.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::change::{self, ChangeStatus};
use crate::consolidated::ConsolidatedEntity;
use crate::entity::EntityType;
use crate::master::{MasterEntity, SourceMapping};
use crate::raw::{RawRecord, RecordKey};
use crate::relationship::Relationship;
use crate::storage::tables::{ConsolidatedTable, MasterTable, RelationshipTable};
use crate::storage::traits::{ConsolidatedStore, MasterStore, RawRecordStore, RelationshipStore, StorageError};

pub(crate) fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct RawState {
    by_key: BTreeMap<RecordKey, Vec<RawRecord>>,
    count: usize,
}

impl RawState {
    fn current(&self, key: &RecordKey) -> Option<&RawRecord> {
        current_of(self.by_key.get(key)?)
    }

    fn push(&mut self, record: RawRecord) {
        self.by_key.entry(record.key()).or_default().push(record);
        self.count += 1;
    }
}

/// Latest by ingestion time; among equal times the later append wins.
fn current_of(history: &[RawRecord]) -> Option<&RawRecord> {
    history
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.ingested_at.cmp(&b.ingested_at).then(ia.cmp(ib)))
        .map(|(_, r)| r)
}

/// Thread-safe in-memory raw record store.
#[derive(Debug, Default)]
pub struct InMemoryRawStore {
    state: RwLock<RawState>,
}

impl InMemoryRawStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks `record` against the current row without storing it.
    pub(crate) fn check(&self, record: &RawRecord) -> Result<ChangeStatus, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("raw.check"))?;
        Ok(change::detect(&record.content_hash, state.current(&record.key())))
    }

    /// Stores `record` without running the change gate. Used when replaying
    /// a journal whose entries already passed it.
    pub(crate) fn restore(&self, record: RawRecord) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("raw.restore"))?;
        state.push(record);
        Ok(())
    }
}

impl RawRecordStore for InMemoryRawStore {
    fn append(&self, record: RawRecord) -> Result<ChangeStatus, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("raw.append"))?;
        let status = change::detect(&record.content_hash, state.current(&record.key()));
        if status.is_changed() {
            state.push(record);
        }
        Ok(status)
    }

    fn latest(&self, key: &RecordKey) -> Result<Option<RawRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("raw.latest"))?;
        Ok(state.current(key).cloned())
    }

    fn history(&self, key: &RecordKey) -> Result<Vec<RawRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("raw.history"))?;
        Ok(state.by_key.get(key).cloned().unwrap_or_default())
    }

    fn current_records(&self, entity_type: EntityType) -> Result<Vec<RawRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("raw.current_records"))?;
        Ok(state
            .by_key
            .iter()
            .filter(|(key, _)| key.entity_type == entity_type)
            .filter_map(|(_, history)| current_of(history).cloned())
            .collect())
    }

    fn count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("raw.count"))?;
        Ok(state.count)
    }
}

/// Thread-safe in-memory consolidated entity store.
#[derive(Debug, Default)]
pub struct InMemoryConsolidatedStore {
    tables: RwLock<HashMap<EntityType, Arc<ConsolidatedTable>>>,
}

impl InMemoryConsolidatedStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish(&self, table: ConsolidatedTable) -> Result<(), StorageError> {
        let table = Arc::new(table);
        let mut tables = self.tables.write().map_err(|_| lock_err("consolidated.publish"))?;
        tables.insert(table.entity_type(), table);
        Ok(())
    }
}

impl ConsolidatedStore for InMemoryConsolidatedStore {
    fn replace_all(&self, entity_type: EntityType, entities: Vec<ConsolidatedEntity>) -> Result<(), StorageError> {
        self.publish(ConsolidatedTable::new(entity_type, entities))
    }

    fn snapshot(&self, entity_type: EntityType) -> Result<Arc<ConsolidatedTable>, StorageError> {
        let tables = self.tables.read().map_err(|_| lock_err("consolidated.snapshot"))?;
        Ok(tables
            .get(&entity_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(ConsolidatedTable::empty(entity_type))))
    }
}

/// Thread-safe in-memory relationship store.
#[derive(Debug, Default)]
pub struct InMemoryRelationshipStore {
    table: RwLock<Arc<RelationshipTable>>,
}

impl InMemoryRelationshipStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish(&self, table: RelationshipTable) -> Result<(), StorageError> {
        let table = Arc::new(table);
        let mut current = self.table.write().map_err(|_| lock_err("relationships.publish"))?;
        *current = table;
        Ok(())
    }
}

impl RelationshipStore for InMemoryRelationshipStore {
    fn replace_all(&self, rows: Vec<Relationship>) -> Result<(), StorageError> {
        self.publish(RelationshipTable::new(rows))
    }

    fn snapshot(&self) -> Result<Arc<RelationshipTable>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("relationships.snapshot"))?;
        Ok(Arc::clone(&table))
    }
}

/// Thread-safe in-memory master store.
#[derive(Debug, Default)]
pub struct InMemoryMasterStore {
    tables: RwLock<HashMap<EntityType, Arc<MasterTable>>>,
}

impl InMemoryMasterStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish(&self, table: MasterTable) -> Result<(), StorageError> {
        let table = Arc::new(table);
        let mut tables = self.tables.write().map_err(|_| lock_err("masters.publish"))?;
        tables.insert(table.entity_type(), table);
        Ok(())
    }
}

impl MasterStore for InMemoryMasterStore {
    fn replace_all(
        &self,
        entity_type: EntityType,
        masters: Vec<MasterEntity>,
        mappings: Vec<SourceMapping>,
    ) -> Result<(), StorageError> {
        self.publish(MasterTable::new(entity_type, masters, mappings))
    }

    fn snapshot(&self, entity_type: EntityType) -> Result<Arc<MasterTable>, StorageError> {
        let tables = self.tables.read().map_err(|_| lock_err("masters.snapshot"))?;
        Ok(tables
            .get(&entity_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(MasterTable::empty(entity_type))))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::*;
    use crate::change::ChangeDetector;
    use crate::raw::{Payload, RawRecordId};
    use crate::source::SourceSystem;

    fn record(external_id: &str, payload: serde_json::Value, minutes: i64) -> RawRecord {
        let payload: Payload = serde_json::from_value(payload).unwrap();
        RawRecord {
            id: RawRecordId::new(),
            entity_type: EntityType::Person,
            source_system: SourceSystem::Hr,
            external_id: external_id.to_string(),
            content_hash: ChangeDetector::default().content_hash(&payload),
            payload,
            ingested_at: Utc::now() + Duration::minutes(minutes),
        }
    }

    #[test]
    fn test_unchanged_append_is_not_stored() {
        let store = InMemoryRawStore::new();
        let first = record("e1", json!({"uniqname": "jsmith", "last_sync": "a"}), 0);
        let again = record("e1", json!({"uniqname": "jsmith", "last_sync": "b"}), 5);

        assert!(store.append(first).unwrap().is_changed());
        assert_eq!(store.append(again).unwrap(), ChangeStatus::Unchanged);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_changed_append_becomes_current() {
        let store = InMemoryRawStore::new();
        let first = record("e1", json!({"uniqname": "jsmith", "title": "A"}), 0);
        let second = record("e1", json!({"uniqname": "jsmith", "title": "B"}), 5);
        let key = first.key();
        let first_hash = first.content_hash.clone();

        store.append(first).unwrap();
        let status = store.append(second).unwrap();
        assert_eq!(
            status,
            ChangeStatus::Changed {
                previous: Some(first_hash)
            }
        );
        assert_eq!(store.latest(&key).unwrap().unwrap().payload["title"], json!("B"));
        assert_eq!(store.history(&key).unwrap().len(), 2);
    }

    #[test]
    fn test_current_is_latest_by_ingestion_time() {
        let store = InMemoryRawStore::new();
        store.append(record("e1", json!({"uniqname": "jsmith", "title": "new"}), 10)).unwrap();
        store.append(record("e1", json!({"uniqname": "jsmith", "title": "old"}), -10)).unwrap();
        store.append(record("e2", json!({"uniqname": "bchen"}), 0)).unwrap();

        let current = store.current_records(EntityType::Person).unwrap();
        assert_eq!(current.len(), 2);
        assert_eq!(current[0].payload["title"], json!("new"));
        assert!(store.current_records(EntityType::Lab).unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_survives_swap() {
        let store = InMemoryRelationshipStore::new();
        let before = store.snapshot().unwrap();
        store.replace_all(Vec::new()).unwrap();
        let after = store.snapshot().unwrap();
        assert!(before.is_empty());
        assert!(after.is_empty());
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_empty_consolidated_snapshot() {
        let store = InMemoryConsolidatedStore::new();
        let table = store.snapshot(EntityType::Lab).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.entity_type(), EntityType::Lab);
    }
}
