//! Persistent storage backend for recondb.
//!
//! # Layout
//!
//! ```text
//! <data-dir>/
//!   .lock                              exclusive process lock
//!   raw.journal                        append-only raw records (CRC framed)
//!   consolidated.<type>.snapshot       one per entity type
//!   relationships.snapshot
//!   master.<type>.snapshot             masters + source mappings
//! ```
//!
//! The journal is the durable raw snapshot every pass is rebuilt from.
//! Derived snapshots are a convenience for readers after a restart; losing
//! one only means rerunning the pass.

mod codec;
mod file_lock;
mod journal;
mod snapshot;
mod stores;

pub use file_lock::FileLock;
pub use journal::{Journal, JournalEntry, Recovery};
pub use stores::{
    PersistentConsolidatedStore, PersistentMasterStore, PersistentRawStore, PersistentRelationshipStore,
    PersistentStores,
};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ReconError;

/// Configuration for persistent storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// Whether to fsync the journal after every append.
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self { sync_on_write: true }
    }
}

/// Opens or creates a persistent store set at `path`.
///
/// # Errors
///
/// Fails if the directory cannot be created, another process holds the lock,
/// or a snapshot cannot be decoded. A torn journal tail is not an error.
///
/// # Example
/// ```rust,ignore
/// use recondb::storage::persistent::open_store;
///
/// let stores = open_store("./recon-data", None)?;
/// let reconciler = Reconciler::with_persistent(&stores, ReconConfig::default())?;
/// ```
pub fn open_store(path: impl AsRef<Path>, config: Option<PersistentConfig>) -> Result<PersistentStores, ReconError> {
    PersistentStores::open(path.as_ref(), &config.unwrap_or_default())
}
