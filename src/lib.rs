//! # recondb
//!
//! Batch identity reconciliation for records pulled from independent systems
//! of record (directory, HR, ticketing, grants, endpoint management, group
//! directories). The crate turns append-only raw records into a
//! deduplicated view of people, departments, computing assets and labs, and
//! infers which lab each computing asset belongs to.
//!
//! ## Pipeline
//!
//! - **Change detection**: payloads are canonicalized and hashed; unchanged
//!   content never reaches the raw store
//! - **Field merge**: per-field priority, union and sum rules produce one
//!   consolidated entity per natural key
//! - **Quality scoring**: a weighted checklist yields a score in `[0, 1]`
//!   and named flags
//! - **Relationship discovery**: tiered, clamped confidences with exactly one
//!   primary lab per related asset
//! - **Master resolution**: consolidated entities sharing a coarser identity
//!   token collapse into golden records
//!
//! ## Usage
//!
//! ```rust,ignore
//! use recondb::{EntityType, IngestRequest, ReconConfig, Reconciler, SourceSystem};
//!
//! let recon = Reconciler::new(ReconConfig::default())?;
//! recon.ingest(IngestRequest::new(
//!     EntityType::Lab,
//!     SourceSystem::Grants,
//!     "G-1001",
//!     payload,
//! ))?;
//! recon.reconcile_all()?;
//!
//! let primary = recon.query().primary_for_object("jsmith-ws01")?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod change;
pub mod config;
pub mod consolidated;
pub mod entity;
pub mod error;
pub mod identity;
pub mod master;
pub mod merge;
pub mod pool;
pub mod quality;
pub mod query;
pub mod raw;
pub mod reconciler;
pub mod relationship;
pub mod source;
pub mod storage;

pub use change::{ChangeDetector, ChangeDetectorConfig, ChangeStatus};
pub use config::ReconConfig;
pub use consolidated::{ConsolidatedEntity, SourceContribution};
pub use entity::{ConsolidatedId, EntityType, MasterId};
pub use error::{ExecutionError, ReconError, ReconResult, ValidationError};
pub use identity::{IdentityField, IdentityRule, IdentityRules, KeyTransform};
pub use master::{MasterEntity, MasterResolver, MasterSettings, SourceMapping};
pub use merge::{FieldMergeResolver, MergeRules, MergeStrategy};
pub use quality::{QualityReport, QualityRules, QualityScorer};
pub use query::ReconQuery;
pub use raw::{ContentHash, IngestRequest, Payload, RawRecord, RawRecordId, RecordKey};
pub use reconciler::{IngestOutcome, IngestSummary, PassReport, ReconcileReport, Reconciler, RelationshipReport};
pub use relationship::{DiscoveryMethod, DiscoverySettings, Relationship, RelationshipEngine, RelationshipId, Tier};
pub use source::SourceSystem;
pub use storage::StorageError;
