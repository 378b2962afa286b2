//! Abstract storage traits for recondb.
//!
//! Four logical stores back a reconciliation pass: the append-only raw
//! record store, and three derived stores (consolidated entities,
//! relationships, master records) that are replaced wholesale per pass.
//! Derived stores hand out immutable table snapshots behind an `Arc`, so a
//! reader keeps a consistent view while a pass swaps in the next one.

use std::sync::Arc;

use thiserror::Error;

use crate::change::ChangeStatus;
use crate::consolidated::ConsolidatedEntity;
use crate::entity::EntityType;
use crate::master::{MasterEntity, SourceMapping};
use crate::raw::{RawRecord, RecordKey};
use crate::relationship::Relationship;
use crate::storage::tables::{ConsolidatedTable, MasterTable, RelationshipTable};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Requested row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Persisted bytes failed validation.
    #[error("Corrupt data: {0}")]
    Corruption(String),
}

/// Append-only store of raw records.
///
/// `append` runs the change gate under the store's write lock: a record whose
/// content hash equals the current row for its key is not stored.
pub trait RawRecordStore: Send + Sync {
    /// Appends `record` unless it is unchanged against the current row.
    fn append(&self, record: RawRecord) -> Result<ChangeStatus, StorageError>;

    /// Returns the current row for `key`: the latest by ingestion time.
    fn latest(&self, key: &RecordKey) -> Result<Option<RawRecord>, StorageError>;

    /// Returns every stored row for `key`, oldest append first.
    fn history(&self, key: &RecordKey) -> Result<Vec<RawRecord>, StorageError>;

    /// Returns the current row of every key of `entity_type`, ordered by key.
    ///
    /// The result is a consistent snapshot taken under one read lock.
    fn current_records(&self, entity_type: EntityType) -> Result<Vec<RawRecord>, StorageError>;

    /// Total number of stored rows.
    fn count(&self) -> Result<usize, StorageError>;
}

/// Consolidated entity tables, one per entity type.
pub trait ConsolidatedStore: Send + Sync {
    /// Replaces the whole table for `entity_type`.
    fn replace_all(&self, entity_type: EntityType, entities: Vec<ConsolidatedEntity>) -> Result<(), StorageError>;

    /// Returns the current table for `entity_type` (empty if never built).
    fn snapshot(&self, entity_type: EntityType) -> Result<Arc<ConsolidatedTable>, StorageError>;
}

/// The relationship table.
pub trait RelationshipStore: Send + Sync {
    /// Replaces every relationship row.
    fn replace_all(&self, rows: Vec<Relationship>) -> Result<(), StorageError>;

    /// Returns the current table (empty if never built).
    fn snapshot(&self) -> Result<Arc<RelationshipTable>, StorageError>;
}

/// Master records and source mappings, one table per entity type.
pub trait MasterStore: Send + Sync {
    /// Replaces the masters and mappings for `entity_type`.
    fn replace_all(
        &self,
        entity_type: EntityType,
        masters: Vec<MasterEntity>,
        mappings: Vec<SourceMapping>,
    ) -> Result<(), StorageError>;

    /// Returns the current table for `entity_type` (empty if never built).
    fn snapshot(&self, entity_type: EntityType) -> Result<Arc<MasterTable>, StorageError>;
}
