//! Read-only queries over the published tables.
//!
//! Every call reads the current snapshot of one table, so a query never
//! mixes rows from two passes of the same table.

use std::sync::Arc;

use crate::consolidated::ConsolidatedEntity;
use crate::entity::EntityType;
use crate::error::ReconResult;
use crate::master::{MasterEntity, SourceMapping};
use crate::raw::{RawRecord, RecordKey};
use crate::relationship::Relationship;
use crate::storage::{
    ConsolidatedStore, ConsolidatedTable, MasterStore, ObjectSummary, RawRecordStore, RelationshipStore,
    RelationshipTable, SubjectSummary,
};

/// Query handle; cheap to clone.
#[derive(Clone)]
pub struct ReconQuery {
    raw: Arc<dyn RawRecordStore>,
    consolidated: Arc<dyn ConsolidatedStore>,
    relationships: Arc<dyn RelationshipStore>,
    masters: Arc<dyn MasterStore>,
}

impl std::fmt::Debug for ReconQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconQuery").finish_non_exhaustive()
    }
}

impl ReconQuery {
    #[must_use]
    pub fn new(
        raw: Arc<dyn RawRecordStore>,
        consolidated: Arc<dyn ConsolidatedStore>,
        relationships: Arc<dyn RelationshipStore>,
        masters: Arc<dyn MasterStore>,
    ) -> Self {
        Self {
            raw,
            consolidated,
            relationships,
            masters,
        }
    }

    /// Consolidated entity by natural key (normalized before lookup).
    ///
    /// # Errors
    ///
    /// Fails when the backing store cannot be read.
    pub fn entity(&self, entity_type: EntityType, natural_key: &str) -> ReconResult<Option<ConsolidatedEntity>> {
        Ok(self.consolidated.snapshot(entity_type)?.get(natural_key).cloned())
    }

    /// The whole consolidated table of one type.
    ///
    /// # Errors
    ///
    /// Fails when the backing store cannot be read.
    pub fn table(&self, entity_type: EntityType) -> ReconResult<Arc<ConsolidatedTable>> {
        Ok(self.consolidated.snapshot(entity_type)?)
    }

    /// Entities with `min <= quality_score <= max`, ascending by score.
    ///
    /// # Errors
    ///
    /// Fails when the backing store cannot be read.
    pub fn by_quality(&self, entity_type: EntityType, min: f64, max: f64) -> ReconResult<Vec<ConsolidatedEntity>> {
        let table = self.consolidated.snapshot(entity_type)?;
        Ok(table.by_quality(min, max).into_iter().cloned().collect())
    }

    /// Entities carrying `flag`.
    ///
    /// # Errors
    ///
    /// Fails when the backing store cannot be read.
    pub fn flagged(&self, entity_type: EntityType, flag: &str) -> ReconResult<Vec<ConsolidatedEntity>> {
        let table = self.consolidated.snapshot(entity_type)?;
        Ok(table.flagged(flag).into_iter().cloned().collect())
    }

    /// Every raw row ever appended for one source record, oldest first.
    ///
    /// # Errors
    ///
    /// Fails when the backing store cannot be read.
    pub fn raw_history(&self, key: &RecordKey) -> ReconResult<Vec<RawRecord>> {
        Ok(self.raw.history(key)?)
    }

    /// The current relationship table.
    ///
    /// # Errors
    ///
    /// Fails when the backing store cannot be read.
    pub fn relationships(&self) -> ReconResult<Arc<RelationshipTable>> {
        Ok(self.relationships.snapshot()?)
    }

    /// Rows whose subject is the lab `subject_key`.
    ///
    /// # Errors
    ///
    /// Fails when the backing store cannot be read.
    pub fn relationships_for_subject(&self, subject_key: &str) -> ReconResult<Vec<Relationship>> {
        let table = self.relationships.snapshot()?;
        Ok(table.for_subject(subject_key).into_iter().cloned().collect())
    }

    /// Rows for the asset `object_key`, in rank order.
    ///
    /// # Errors
    ///
    /// Fails when the backing store cannot be read.
    pub fn relationships_for_object(&self, object_key: &str) -> ReconResult<Vec<Relationship>> {
        let table = self.relationships.snapshot()?;
        Ok(table.for_object(object_key).into_iter().cloned().collect())
    }

    /// Primary row of the asset `object_key`.
    ///
    /// # Errors
    ///
    /// Fails when the backing store cannot be read.
    pub fn primary_for_object(&self, object_key: &str) -> ReconResult<Option<Relationship>> {
        Ok(self.relationships.snapshot()?.primary_for_object(object_key).cloned())
    }

    /// Active relationships of one asset, precomputed at publish time.
    ///
    /// # Errors
    ///
    /// Fails when the backing store cannot be read.
    pub fn object_summary(&self, object_key: &str) -> ReconResult<Option<ObjectSummary>> {
        Ok(self.relationships.snapshot()?.object_summary(object_key).cloned())
    }

    /// Per-lab asset summary, precomputed at publish time.
    ///
    /// # Errors
    ///
    /// Fails when the backing store cannot be read.
    pub fn subject_summary(&self, subject_key: &str) -> ReconResult<Option<SubjectSummary>> {
        Ok(self.relationships.snapshot()?.subject_summary(subject_key).cloned())
    }

    /// The master record a consolidated natural key belongs to, with its
    /// source mappings.
    ///
    /// # Errors
    ///
    /// Fails when the backing store cannot be read.
    pub fn master_for(
        &self,
        entity_type: EntityType,
        natural_key: &str,
    ) -> ReconResult<Option<(MasterEntity, Vec<SourceMapping>)>> {
        let table = self.masters.snapshot(entity_type)?;
        Ok(table.master_for(natural_key).map(|master| {
            let mappings = table.mappings_for(master.master_id).into_iter().cloned().collect();
            (master.clone(), mappings)
        }))
    }
}
