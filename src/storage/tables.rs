//! Immutable derived tables with their read indexes and precomputed
//! projections.
//!
//! Tables are built once, off to the side, and then published whole; nothing
//! mutates a table after construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::consolidated::ConsolidatedEntity;
use crate::entity::{normalize_key, EntityType, MasterId};
use crate::master::{MasterEntity, SourceMapping};
use crate::relationship::{DiscoveryMethod, Relationship, Tier};

/// Consolidated entities of one type keyed by natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedTable {
    entity_type: EntityType,
    by_key: BTreeMap<String, ConsolidatedEntity>,
}

impl ConsolidatedTable {
    /// Builds a table. A later entity with a duplicate key replaces the
    /// earlier one.
    #[must_use]
    pub fn new(entity_type: EntityType, entities: Vec<ConsolidatedEntity>) -> Self {
        let by_key = entities
            .into_iter()
            .filter(|e| e.entity_type == entity_type)
            .map(|e| (e.natural_key.clone(), e))
            .collect();
        Self { entity_type, by_key }
    }

    #[must_use]
    pub fn empty(entity_type: EntityType) -> Self {
        Self::new(entity_type, Vec::new())
    }

    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Looks up an entity by natural key (normalized before lookup).
    #[must_use]
    pub fn get(&self, natural_key: &str) -> Option<&ConsolidatedEntity> {
        self.by_key.get(&normalize_key(natural_key))
    }

    /// Entities ordered by natural key.
    pub fn iter(&self) -> impl Iterator<Item = &ConsolidatedEntity> {
        self.by_key.values()
    }

    /// Owned copies of every entity, ordered by natural key.
    #[must_use]
    pub fn to_vec(&self) -> Vec<ConsolidatedEntity> {
        self.by_key.values().cloned().collect()
    }

    /// Entities whose quality score lies in `[min, max]`, lowest first.
    #[must_use]
    pub fn by_quality(&self, min: f64, max: f64) -> Vec<&ConsolidatedEntity> {
        let mut out: Vec<&ConsolidatedEntity> = self
            .by_key
            .values()
            .filter(|e| e.quality_score >= min && e.quality_score <= max)
            .collect();
        out.sort_by(|a, b| {
            a.quality_score
                .partial_cmp(&b.quality_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.natural_key.cmp(&b.natural_key))
        });
        out
    }

    /// Entities carrying `flag`, ordered by natural key.
    #[must_use]
    pub fn flagged(&self, flag: &str) -> Vec<&ConsolidatedEntity> {
        self.by_key.values().filter(|e| e.has_flag(flag)).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Active relationships for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub object_key: String,
    pub primary_subject: String,
    pub primary_method: DiscoveryMethod,
    pub primary_confidence: f64,
    pub relationship_count: usize,
    /// Distinct labs related to the asset, sorted.
    pub subjects: Vec<String>,
}

/// Asset summary for one lab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectSummary {
    pub subject_key: String,
    /// Distinct related assets.
    pub asset_count: usize,
    /// Assets for which this lab holds the primary row.
    pub primary_asset_count: usize,
    pub strong_rows: usize,
    pub weak_rows: usize,
    /// Assets for which this lab holds the primary row, sorted.
    pub primary_assets: Vec<String>,
}

/// All relationship rows with subject and object indexes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelationshipTable {
    rows: Vec<Relationship>,
    by_subject: BTreeMap<String, Vec<usize>>,
    by_object: BTreeMap<String, Vec<usize>>,
    object_summaries: BTreeMap<String, ObjectSummary>,
    subject_summaries: BTreeMap<String, SubjectSummary>,
}

impl RelationshipTable {
    /// Builds the table and its projections.
    #[must_use]
    pub fn new(rows: Vec<Relationship>) -> Self {
        let mut by_subject: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut by_object: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, row) in rows.iter().enumerate() {
            by_subject.entry(row.subject_key.clone()).or_default().push(idx);
            by_object.entry(row.object_key.clone()).or_default().push(idx);
        }

        let mut object_summaries = BTreeMap::new();
        for (object, idxs) in &by_object {
            let related: Vec<&Relationship> = idxs.iter().map(|&i| &rows[i]).collect();
            let Some(primary) = related.iter().find(|r| r.is_primary).or_else(|| related.first()) else {
                continue;
            };
            let mut subjects: Vec<String> = related.iter().map(|r| r.subject_key.clone()).collect();
            subjects.sort();
            subjects.dedup();
            object_summaries.insert(
                object.clone(),
                ObjectSummary {
                    object_key: object.clone(),
                    primary_subject: primary.subject_key.clone(),
                    primary_method: primary.discovery_method,
                    primary_confidence: primary.confidence,
                    relationship_count: related.len(),
                    subjects,
                },
            );
        }

        let mut subject_summaries = BTreeMap::new();
        for (subject, idxs) in &by_subject {
            let related: Vec<&Relationship> = idxs.iter().map(|&i| &rows[i]).collect();
            let mut assets: Vec<&str> = related.iter().map(|r| r.object_key.as_str()).collect();
            assets.sort_unstable();
            assets.dedup();
            let mut primary_assets: Vec<String> = related
                .iter()
                .filter(|r| r.is_primary)
                .map(|r| r.object_key.clone())
                .collect();
            primary_assets.sort();
            primary_assets.dedup();
            subject_summaries.insert(
                subject.clone(),
                SubjectSummary {
                    subject_key: subject.clone(),
                    asset_count: assets.len(),
                    primary_asset_count: primary_assets.len(),
                    strong_rows: related.iter().filter(|r| r.tier() == Tier::Strong).count(),
                    weak_rows: related.iter().filter(|r| r.tier() == Tier::Weak).count(),
                    primary_assets,
                },
            );
        }

        Self {
            rows,
            by_subject,
            by_object,
            object_summaries,
            subject_summaries,
        }
    }

    #[must_use]
    pub fn rows(&self) -> &[Relationship] {
        &self.rows
    }

    /// Rows whose subject (lab) has natural key `subject_key`.
    #[must_use]
    pub fn for_subject(&self, subject_key: &str) -> Vec<&Relationship> {
        self.lookup(&self.by_subject, subject_key)
    }

    /// Rows whose object (asset) has natural key `object_key`, in rank order.
    #[must_use]
    pub fn for_object(&self, object_key: &str) -> Vec<&Relationship> {
        self.lookup(&self.by_object, object_key)
    }

    #[must_use]
    pub fn primary_for_object(&self, object_key: &str) -> Option<&Relationship> {
        self.for_object(object_key).into_iter().find(|r| r.is_primary)
    }

    #[must_use]
    pub fn object_summary(&self, object_key: &str) -> Option<&ObjectSummary> {
        self.object_summaries.get(&normalize_key(object_key))
    }

    #[must_use]
    pub fn subject_summary(&self, subject_key: &str) -> Option<&SubjectSummary> {
        self.subject_summaries.get(&normalize_key(subject_key))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn lookup(&self, index: &BTreeMap<String, Vec<usize>>, key: &str) -> Vec<&Relationship> {
        index
            .get(&normalize_key(key))
            .map(|idxs| idxs.iter().map(|&i| &self.rows[i]).collect())
            .unwrap_or_default()
    }
}

/// Master records and mappings of one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterTable {
    entity_type: EntityType,
    masters: Vec<MasterEntity>,
    mappings: Vec<SourceMapping>,
    by_member: BTreeMap<String, usize>,
}

impl MasterTable {
    #[must_use]
    pub fn new(entity_type: EntityType, masters: Vec<MasterEntity>, mappings: Vec<SourceMapping>) -> Self {
        let mut by_member = BTreeMap::new();
        for (idx, master) in masters.iter().enumerate() {
            for key in &master.member_keys {
                by_member.insert(key.clone(), idx);
            }
        }
        Self {
            entity_type,
            masters,
            mappings,
            by_member,
        }
    }

    #[must_use]
    pub fn empty(entity_type: EntityType) -> Self {
        Self::new(entity_type, Vec::new(), Vec::new())
    }

    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    #[must_use]
    pub fn masters(&self) -> &[MasterEntity] {
        &self.masters
    }

    #[must_use]
    pub fn mappings(&self) -> &[SourceMapping] {
        &self.mappings
    }

    /// The master that a consolidated natural key was grouped into.
    #[must_use]
    pub fn master_for(&self, natural_key: &str) -> Option<&MasterEntity> {
        self.by_member
            .get(&normalize_key(natural_key))
            .map(|&idx| &self.masters[idx])
    }

    #[must_use]
    pub fn mappings_for(&self, master_id: MasterId) -> Vec<&SourceMapping> {
        self.mappings.iter().filter(|m| m.master_id == master_id).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.masters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.masters.is_empty()
    }
}
