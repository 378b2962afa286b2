//! Storage traits and backends.
//!
//! The traits define the four logical stores. `memory` provides the
//! in-memory backend; `persistent` (feature `persistent`) adds a durable raw
//! journal and snapshot files on top of it.

mod memory;
mod tables;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::{InMemoryConsolidatedStore, InMemoryMasterStore, InMemoryRawStore, InMemoryRelationshipStore};
pub use tables::{ConsolidatedTable, MasterTable, ObjectSummary, RelationshipTable, SubjectSummary};
pub use traits::{ConsolidatedStore, MasterStore, RawRecordStore, RelationshipStore, StorageError};
