//! Ingestion and batch passes over pluggable stores.
//!
//! A [`Reconciler`] owns no data itself. It validates and appends raw
//! records through the change gate, and rebuilds the derived tables from the
//! current raw snapshot on demand. Each pass builds its full output off to
//! the side and hands it to the store in one `replace_all`, so readers keep
//! seeing the previous table until the new one is complete.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::change::{ChangeDetector, ChangeStatus};
use crate::config::ReconConfig;
use crate::consolidated::ConsolidatedEntity;
use crate::entity::EntityType;
use crate::error::{ReconError, ReconResult};
use crate::identity::IdentityRules;
use crate::master::MasterResolver;
use crate::merge::FieldMergeResolver;
use crate::pool::{PartitionedPool, PoolConfig};
use crate::quality::QualityScorer;
use crate::query::ReconQuery;
use crate::raw::{ContentHash, IngestRequest, RawRecord, RawRecordId};
use crate::relationship::{enforce_tier_bounds, AssetProfile, RelationshipEngine};
use crate::storage::{
    ConsolidatedStore, InMemoryConsolidatedStore, InMemoryMasterStore, InMemoryRawStore,
    InMemoryRelationshipStore, MasterStore, RawRecordStore, RelationshipStore,
};

/// Result of one accepted ingestion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub natural_key: String,
    pub content_hash: ContentHash,
    /// Id of the appended row; `None` when the payload was unchanged.
    pub record_id: Option<RawRecordId>,
    pub status: ChangeStatus,
}

/// Counts for a batch of ingestion requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub appended: usize,
    pub unchanged: usize,
    pub rejected: usize,
}

/// Counts for one relationship pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipReport {
    pub labs: usize,
    pub assets: usize,
    pub relationships: usize,
    /// Objects with at least one row, hence exactly one primary.
    pub related_assets: usize,
    /// Rows whose confidence had to be pulled back into tier bounds.
    pub tier_corrections: usize,
}

/// Counts for one entity-type pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub entity_type: EntityType,
    pub raw_records: usize,
    pub consolidated: usize,
    /// Current rows whose natural key no longer derives under the active
    /// identity rules.
    pub skipped: usize,
    pub flagged: usize,
    pub masters: usize,
    pub elapsed_ms: u64,
}

/// Counts for a full pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub passes: Vec<PassReport>,
    pub relationships: RelationshipReport,
}

/// The reconciliation engine.
#[derive(Clone)]
pub struct Reconciler {
    raw: Arc<dyn RawRecordStore>,
    consolidated: Arc<dyn ConsolidatedStore>,
    relationships: Arc<dyn RelationshipStore>,
    masters: Arc<dyn MasterStore>,
    detector: ChangeDetector,
    identity: IdentityRules,
    merger: FieldMergeResolver,
    scorer: Arc<QualityScorer>,
    discovery: RelationshipEngine,
    resolver: MasterResolver,
    pool: PartitionedPool,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("workers", &self.pool.workers())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler over fresh in-memory stores.
    ///
    /// # Errors
    ///
    /// Fails if `config` does not validate.
    pub fn new(config: ReconConfig) -> ReconResult<Self> {
        Self::with_stores(
            Arc::new(InMemoryRawStore::new()),
            Arc::new(InMemoryConsolidatedStore::new()),
            Arc::new(InMemoryRelationshipStore::new()),
            Arc::new(InMemoryMasterStore::new()),
            config,
        )
    }

    /// Creates a reconciler over the given stores.
    ///
    /// # Errors
    ///
    /// Fails if `config` does not validate.
    pub fn with_stores(
        raw: Arc<dyn RawRecordStore>,
        consolidated: Arc<dyn ConsolidatedStore>,
        relationships: Arc<dyn RelationshipStore>,
        masters: Arc<dyn MasterStore>,
        config: ReconConfig,
    ) -> ReconResult<Self> {
        config.validate()?;
        let scorer = QualityScorer::new(&config.quality)?;
        let discovery = RelationshipEngine::new(config.discovery)?;
        Ok(Self {
            raw,
            consolidated,
            relationships,
            masters,
            detector: ChangeDetector::new(config.change),
            identity: config.identity,
            merger: FieldMergeResolver::new(config.merge),
            scorer: Arc::new(scorer),
            discovery,
            resolver: MasterResolver::new(config.master),
            pool: PartitionedPool::new(PoolConfig {
                name: "recon",
                workers: config.workers,
                queue_capacity: config.queue_capacity,
            }),
        })
    }

    /// Creates a reconciler over an opened persistent data directory.
    ///
    /// # Errors
    ///
    /// Fails if `config` does not validate.
    #[cfg(feature = "persistent")]
    pub fn with_persistent(
        stores: &crate::storage::persistent::PersistentStores,
        config: ReconConfig,
    ) -> ReconResult<Self> {
        Self::with_stores(
            stores.raw.clone(),
            stores.consolidated.clone(),
            stores.relationships.clone(),
            stores.masters.clone(),
            config,
        )
    }

    /// Read-only view over the derived tables.
    #[must_use]
    pub fn query(&self) -> ReconQuery {
        ReconQuery::new(
            self.raw.clone(),
            self.consolidated.clone(),
            self.relationships.clone(),
            self.masters.clone(),
        )
    }

    /// Validates one request and appends it unless its content is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ReconError::Validation`] for a malformed request or one
    /// without a derivable natural key; nothing is stored in that case.
    pub fn ingest(&self, request: IngestRequest) -> ReconResult<IngestOutcome> {
        let natural_key = match self.admit(&request) {
            Ok(key) => key,
            Err(err) => {
                warn!(
                    entity_type = %request.entity_type,
                    source = %request.source_system,
                    external_id = %request.external_id,
                    error = %err,
                    "rejected ingest"
                );
                return Err(err);
            }
        };

        let record = RawRecord {
            id: RawRecordId::new(),
            entity_type: request.entity_type,
            source_system: request.source_system,
            external_id: request.external_id.trim().to_string(),
            content_hash: self.detector.content_hash(&request.payload),
            payload: request.payload,
            ingested_at: request.ingested_at,
        };
        let record_id = record.id;
        let content_hash = record.content_hash.clone();
        let key = record.key();

        let status = self.raw.append(record)?;
        debug!(key = %key, natural_key = %natural_key, changed = status.is_changed(), "ingested");
        Ok(IngestOutcome {
            natural_key,
            content_hash,
            record_id: status.is_changed().then_some(record_id),
            status,
        })
    }

    /// Ingests every request, counting rejections instead of stopping.
    ///
    /// # Errors
    ///
    /// Fails only on storage errors; validation failures are counted.
    pub fn ingest_all(&self, requests: impl IntoIterator<Item = IngestRequest>) -> ReconResult<IngestSummary> {
        let mut summary = IngestSummary::default();
        for request in requests {
            match self.ingest(request) {
                Ok(outcome) if outcome.status.is_changed() => summary.appended += 1,
                Ok(_) => summary.unchanged += 1,
                Err(ReconError::Validation(_)) => summary.rejected += 1,
                Err(err) => return Err(err),
            }
        }
        info!(
            appended = summary.appended,
            unchanged = summary.unchanged,
            rejected = summary.rejected,
            "ingest batch complete"
        );
        Ok(summary)
    }

    fn admit(&self, request: &IngestRequest) -> ReconResult<String> {
        request.validate()?;
        let key = self
            .identity
            .natural_key(request.entity_type, &request.source_system, &request.payload)?;
        Ok(key)
    }

    /// Rebuilds the consolidated and master tables of one entity type from
    /// the current raw snapshot.
    ///
    /// # Errors
    ///
    /// Fails on storage or worker errors; the previous tables stay in place.
    pub fn reconcile(&self, entity_type: EntityType) -> ReconResult<PassReport> {
        let span = info_span!("reconcile", entity_type = %entity_type);
        let _enter = span.enter();
        let started = Instant::now();

        let current = self.raw.current_records(entity_type)?;
        let raw_records = current.len();

        let mut groups: BTreeMap<String, Vec<RawRecord>> = BTreeMap::new();
        let mut skipped = 0usize;
        for record in current {
            match self
                .identity
                .natural_key(entity_type, &record.source_system, &record.payload)
            {
                Ok(key) => groups.entry(key).or_default().push(record),
                Err(err) => {
                    skipped += 1;
                    warn!(key = %record.key(), error = %err, "current record has no natural key");
                }
            }
        }

        let merger = &self.merger;
        let scorer = &self.scorer;
        let entities: Vec<ConsolidatedEntity> = self.pool.run(
            groups.into_iter().collect::<Vec<_>>(),
            |(key, _)| key.as_str(),
            |(key, records)| {
                let mut entity = merger.merge(entity_type, &key, &records);
                scorer.apply(&mut entity);
                entity
            },
        )?;

        let flagged = entities.iter().filter(|e| !e.quality_flags.is_empty()).count();
        let consolidated = entities.len();
        let (masters, mappings) = self.resolver.resolve(entity_type, &entities);
        let master_count = masters.len();

        self.consolidated.replace_all(entity_type, entities)?;
        self.masters.replace_all(entity_type, masters, mappings)?;

        let report = PassReport {
            entity_type,
            raw_records,
            consolidated,
            skipped,
            flagged,
            masters: master_count,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        info!(
            raw_records,
            consolidated,
            skipped,
            flagged,
            masters = master_count,
            elapsed_ms = report.elapsed_ms,
            "pass complete"
        );
        Ok(report)
    }

    /// Rebuilds the relationship table from the current lab and computing
    /// asset snapshots.
    ///
    /// # Errors
    ///
    /// Fails on storage or worker errors; the previous table stays in place.
    pub fn reconcile_relationships(&self) -> ReconResult<RelationshipReport> {
        let span = info_span!("reconcile_relationships");
        let _enter = span.enter();

        // Both snapshots are taken before any discovery work starts.
        let labs = self.consolidated.snapshot(EntityType::Lab)?;
        let assets = self.consolidated.snapshot(EntityType::ComputingAsset)?;

        let engine = &self.discovery;
        let lab_profiles = engine.lab_profiles(&labs.to_vec());
        let asset_profiles: Vec<AssetProfile> = assets.iter().map(|a| engine.asset_profile(a)).collect();

        let per_object = self.pool.run(
            asset_profiles,
            |asset| asset.key.as_str(),
            |asset| engine.discover_for_object(&asset, &lab_profiles),
        )?;
        let related_assets = per_object.iter().filter(|rows| !rows.is_empty()).count();
        let mut rows: Vec<_> = per_object.into_iter().flatten().collect();
        let tier_corrections = enforce_tier_bounds(&mut rows);

        let report = RelationshipReport {
            labs: lab_profiles.len(),
            assets: assets.len(),
            relationships: rows.len(),
            related_assets,
            tier_corrections,
        };
        self.relationships.replace_all(rows)?;

        info!(
            labs = report.labs,
            assets = report.assets,
            relationships = report.relationships,
            related_assets,
            "relationship pass complete"
        );
        Ok(report)
    }

    /// Reconciles every entity type, then rebuilds relationships.
    ///
    /// # Errors
    ///
    /// Stops at the first failing pass.
    pub fn reconcile_all(&self) -> ReconResult<ReconcileReport> {
        let passes = EntityType::ALL
            .into_iter()
            .map(|entity_type| self.reconcile(entity_type))
            .collect::<ReconResult<Vec<_>>>()?;
        let relationships = self.reconcile_relationships()?;
        Ok(ReconcileReport { passes, relationships })
    }
}
