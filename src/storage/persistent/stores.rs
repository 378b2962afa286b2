//! Persistent store implementations.
//!
//! Each store keeps its readable state in the matching in-memory store and
//! makes it durable underneath: raw records through the journal, derived
//! tables through atomically replaced snapshot files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::change::ChangeStatus;
use crate::consolidated::ConsolidatedEntity;
use crate::entity::EntityType;
use crate::error::{ExecutionError, ReconError};
use crate::master::{MasterEntity, SourceMapping};
use crate::raw::{RawRecord, RecordKey};
use crate::relationship::Relationship;
use crate::storage::memory::{
    lock_err, InMemoryConsolidatedStore, InMemoryMasterStore, InMemoryRawStore, InMemoryRelationshipStore,
};
use crate::storage::tables::{ConsolidatedTable, MasterTable, RelationshipTable};
use crate::storage::traits::{ConsolidatedStore, MasterStore, RawRecordStore, RelationshipStore, StorageError};

use super::file_lock::FileLock;
use super::journal::Journal;
use super::snapshot::{read_snapshot, write_snapshot};
use super::PersistentConfig;

const JOURNAL_FILE: &str = "raw.journal";
const RELATIONSHIPS_FILE: &str = "relationships.snapshot";

fn io_err(context: &str, err: &std::io::Error) -> StorageError {
    StorageError::BackendError(format!("{context}: {err}"))
}

fn open_err(context: &str, err: impl std::fmt::Display) -> ReconError {
    ReconError::Execution(ExecutionError::Storage {
        message: format!("{context}: {err}"),
    })
}

fn consolidated_file(entity_type: EntityType) -> String {
    format!("consolidated.{entity_type}.snapshot")
}

fn master_file(entity_type: EntityType) -> String {
    format!("master.{entity_type}.snapshot")
}

#[derive(Serialize, Deserialize)]
struct MasterSnapshot {
    masters: Vec<MasterEntity>,
    mappings: Vec<SourceMapping>,
}

/// Journaled raw record store.
#[derive(Debug)]
pub struct PersistentRawStore {
    inner: InMemoryRawStore,
    journal: Journal,
    append_gate: Mutex<()>,
}

impl PersistentRawStore {
    fn open(path: &Path, sync_on_write: bool) -> Result<Self, ReconError> {
        let (journal, recovery) = Journal::open(path, sync_on_write).map_err(|e| open_err("failed to open journal", e))?;
        if recovery.discarded_bytes > 0 {
            warn!(
                discarded_bytes = recovery.discarded_bytes,
                "discarded torn journal tail"
            );
        }

        let inner = InMemoryRawStore::new();
        let replayed = recovery.entries.len();
        for entry in recovery.entries {
            inner.restore(entry.record)?;
        }
        info!(path = %path.display(), replayed, "replayed raw journal");

        Ok(Self {
            inner,
            journal,
            append_gate: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.journal
    }
}

impl RawRecordStore for PersistentRawStore {
    fn append(&self, record: RawRecord) -> Result<ChangeStatus, StorageError> {
        let _gate = self.append_gate.lock().map_err(|_| lock_err("raw.append_gate"))?;
        let status = self.inner.check(&record)?;
        if status.is_changed() {
            self.journal
                .append(&record)
                .map_err(|e| io_err("journal append failed", &e))?;
            self.inner.restore(record)?;
        }
        Ok(status)
    }

    fn latest(&self, key: &RecordKey) -> Result<Option<RawRecord>, StorageError> {
        self.inner.latest(key)
    }

    fn history(&self, key: &RecordKey) -> Result<Vec<RawRecord>, StorageError> {
        self.inner.history(key)
    }

    fn current_records(&self, entity_type: EntityType) -> Result<Vec<RawRecord>, StorageError> {
        self.inner.current_records(entity_type)
    }

    fn count(&self) -> Result<usize, StorageError> {
        self.inner.count()
    }
}

/// Consolidated tables persisted as snapshot files.
#[derive(Debug)]
pub struct PersistentConsolidatedStore {
    dir: PathBuf,
    inner: InMemoryConsolidatedStore,
}

impl PersistentConsolidatedStore {
    fn open(dir: &Path) -> Result<Self, ReconError> {
        let inner = InMemoryConsolidatedStore::new();
        for entity_type in EntityType::ALL {
            let path = dir.join(consolidated_file(entity_type));
            let table: Option<ConsolidatedTable> =
                read_snapshot(&path).map_err(|e| open_err("failed to load consolidated snapshot", e))?;
            if let Some(table) = table {
                inner.publish(table)?;
            }
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            inner,
        })
    }
}

impl ConsolidatedStore for PersistentConsolidatedStore {
    fn replace_all(&self, entity_type: EntityType, entities: Vec<ConsolidatedEntity>) -> Result<(), StorageError> {
        let table = ConsolidatedTable::new(entity_type, entities);
        write_snapshot(&self.dir.join(consolidated_file(entity_type)), &table)
            .map_err(|e| io_err("consolidated snapshot write failed", &e))?;
        self.inner.publish(table)
    }

    fn snapshot(&self, entity_type: EntityType) -> Result<Arc<ConsolidatedTable>, StorageError> {
        self.inner.snapshot(entity_type)
    }
}

/// Relationship table persisted as a snapshot file.
#[derive(Debug)]
pub struct PersistentRelationshipStore {
    path: PathBuf,
    inner: InMemoryRelationshipStore,
}

impl PersistentRelationshipStore {
    fn open(dir: &Path) -> Result<Self, ReconError> {
        let path = dir.join(RELATIONSHIPS_FILE);
        let inner = InMemoryRelationshipStore::new();
        let rows: Option<Vec<Relationship>> =
            read_snapshot(&path).map_err(|e| open_err("failed to load relationship snapshot", e))?;
        if let Some(rows) = rows {
            inner.publish(RelationshipTable::new(rows))?;
        }
        Ok(Self { path, inner })
    }
}

impl RelationshipStore for PersistentRelationshipStore {
    fn replace_all(&self, rows: Vec<Relationship>) -> Result<(), StorageError> {
        write_snapshot(&self.path, &rows).map_err(|e| io_err("relationship snapshot write failed", &e))?;
        self.inner.publish(RelationshipTable::new(rows))
    }

    fn snapshot(&self) -> Result<Arc<RelationshipTable>, StorageError> {
        self.inner.snapshot()
    }
}

/// Master tables persisted as snapshot files.
#[derive(Debug)]
pub struct PersistentMasterStore {
    dir: PathBuf,
    inner: InMemoryMasterStore,
}

impl PersistentMasterStore {
    fn open(dir: &Path) -> Result<Self, ReconError> {
        let inner = InMemoryMasterStore::new();
        for entity_type in EntityType::ALL {
            let path = dir.join(master_file(entity_type));
            let snapshot: Option<MasterSnapshot> =
                read_snapshot(&path).map_err(|e| open_err("failed to load master snapshot", e))?;
            if let Some(snapshot) = snapshot {
                inner.publish(MasterTable::new(entity_type, snapshot.masters, snapshot.mappings))?;
            }
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            inner,
        })
    }
}

impl MasterStore for PersistentMasterStore {
    fn replace_all(
        &self,
        entity_type: EntityType,
        masters: Vec<MasterEntity>,
        mappings: Vec<SourceMapping>,
    ) -> Result<(), StorageError> {
        let snapshot = MasterSnapshot { masters, mappings };
        write_snapshot(&self.dir.join(master_file(entity_type)), &snapshot)
            .map_err(|e| io_err("master snapshot write failed", &e))?;
        self.inner
            .publish(MasterTable::new(entity_type, snapshot.masters, snapshot.mappings))
    }

    fn snapshot(&self, entity_type: EntityType) -> Result<Arc<MasterTable>, StorageError> {
        self.inner.snapshot(entity_type)
    }
}

/// All four persistent stores over one locked data directory.
#[derive(Debug)]
pub struct PersistentStores {
    pub dir: PathBuf,
    _lock: FileLock,
    pub raw: Arc<PersistentRawStore>,
    pub consolidated: Arc<PersistentConsolidatedStore>,
    pub relationships: Arc<PersistentRelationshipStore>,
    pub masters: Arc<PersistentMasterStore>,
}

impl PersistentStores {
    /// Opens or creates a data directory, replaying the journal and loading
    /// the latest derived snapshots.
    pub fn open(dir: &Path, config: &PersistentConfig) -> Result<Self, ReconError> {
        fs::create_dir_all(dir).map_err(|e| open_err("failed to create data directory", e))?;
        let lock = FileLock::acquire(dir).map_err(|e| open_err("failed to acquire lock", e))?;

        let raw = PersistentRawStore::open(&dir.join(JOURNAL_FILE), config.sync_on_write)?;
        let consolidated = PersistentConsolidatedStore::open(dir)?;
        let relationships = PersistentRelationshipStore::open(dir)?;
        let masters = PersistentMasterStore::open(dir)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            raw: Arc::new(raw),
            consolidated: Arc::new(consolidated),
            relationships: Arc::new(relationships),
            masters: Arc::new(masters),
        })
    }
}
