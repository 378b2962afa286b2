//! Master (golden) record resolution.
//!
//! Consolidated entities that share a normalized identity token are grouped
//! transitively into one master record. Canonical attributes are taken by
//! priority one level up: contributors are ordered by quality score, then by
//! how many sources fed them, then by natural key, and the first contributor
//! holding a value wins. Disagreements are listed, never auto-fixed.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::consolidated::{scalar_text, ConsolidatedEntity};
use crate::entity::{normalize_key, ConsolidatedId, EntityType, MasterId};
use crate::error::ValidationError;
use crate::quality::round4;
use crate::source::SourceSystem;

/// Fields whose normalized values link consolidated entities of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterMatchRule {
    pub entity_type: EntityType,
    pub fields: Vec<String>,
}

/// Master resolver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterSettings {
    pub match_rules: Vec<MasterMatchRule>,
    pub contribution_weight: f64,
}

impl Default for MasterSettings {
    fn default() -> Self {
        let rule = |entity_type, fields: &[&str]| MasterMatchRule {
            entity_type,
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
        };
        Self {
            match_rules: vec![
                rule(EntityType::Person, &["email", "employee_id"]),
                rule(EntityType::Department, &["department_code"]),
                rule(EntityType::ComputingAsset, &["serial_number", "mac_address"]),
                rule(EntityType::Lab, &["ou_dn"]),
            ],
            contribution_weight: 1.0,
        }
    }
}

impl MasterSettings {
    /// Replaces the match rules of every entity type present in `overrides`.
    #[must_use]
    pub fn overlay(mut self, overrides: Vec<MasterMatchRule>) -> Self {
        for rule in overrides {
            self.match_rules.retain(|r| r.entity_type != rule.entity_type);
            self.match_rules.push(rule);
        }
        self
    }

    /// # Errors
    ///
    /// Rejects a contribution weight outside (0, 1].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.contribution_weight > 0.0 && self.contribution_weight <= 1.0) {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "contribution_weight must be within (0, 1] (got {})",
                    self.contribution_weight
                ),
            });
        }
        Ok(())
    }

    fn fields_for(&self, entity_type: EntityType) -> &[String] {
        self.match_rules
            .iter()
            .find(|r| r.entity_type == entity_type)
            .map_or(&[], |r| r.fields.as_slice())
    }
}

/// The resolved cross-source truth for one real-world thing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterEntity {
    pub master_id: MasterId,
    pub entity_type: EntityType,
    /// Smallest natural key in the group.
    pub anchor_key: String,
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub confidence_score: f64,
    /// Distinct source systems behind the group.
    pub source_count: usize,
    /// Source that supplied the most canonical attributes.
    pub primary_source: Option<SourceSystem>,
    /// Natural keys of the grouped consolidated entities, sorted.
    pub member_keys: Vec<String>,
    /// Attributes on which contributors disagree.
    #[serde(default)]
    pub conflicts: Vec<String>,
}

/// Links one consolidated entity to its master record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMapping {
    pub master_id: MasterId,
    pub consolidated_entity_id: ConsolidatedId,
    pub natural_key: String,
    pub contribution_weight: f64,
    pub is_primary_source: bool,
}

/// Groups consolidated entities into master records.
#[derive(Debug, Clone, Default)]
pub struct MasterResolver {
    settings: MasterSettings,
}

impl MasterResolver {
    #[must_use]
    pub fn new(settings: MasterSettings) -> Self {
        Self { settings }
    }

    /// Resolves the consolidated entities of one type. Masters come back
    /// ordered by anchor key; mappings follow their master's order.
    #[must_use]
    pub fn resolve(
        &self,
        entity_type: EntityType,
        entities: &[ConsolidatedEntity],
    ) -> (Vec<MasterEntity>, Vec<SourceMapping>) {
        let mut sorted: Vec<&ConsolidatedEntity> = entities.iter().filter(|e| e.entity_type == entity_type).collect();
        sorted.sort_by(|a, b| a.natural_key.cmp(&b.natural_key));

        let groups = group_by_tokens(&sorted, self.settings.fields_for(entity_type));

        let mut masters = Vec::with_capacity(groups.len());
        let mut mappings = Vec::with_capacity(sorted.len());
        for mut group in groups {
            group.sort_by(|a, b| {
                b.quality_score
                    .partial_cmp(&a.quality_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.sources.len().cmp(&a.sources.len()))
                    .then_with(|| a.natural_key.cmp(&b.natural_key))
            });
            let master = self.build_master(entity_type, &group);
            for (idx, contributor) in group.iter().enumerate() {
                mappings.push(SourceMapping {
                    master_id: master.master_id,
                    consolidated_entity_id: contributor.id,
                    natural_key: contributor.natural_key.clone(),
                    contribution_weight: self.settings.contribution_weight,
                    is_primary_source: idx == 0,
                });
            }
            masters.push(master);
        }
        (masters, mappings)
    }

    fn build_master(&self, entity_type: EntityType, group: &[&ConsolidatedEntity]) -> MasterEntity {
        let mut member_keys: Vec<String> = group.iter().map(|e| e.natural_key.clone()).collect();
        member_keys.sort();
        let anchor_key = member_keys.first().cloned().unwrap_or_default();

        let field_names: BTreeSet<&String> = group.iter().flat_map(|e| e.fields.keys()).collect();
        let mut attributes = BTreeMap::new();
        let mut supplied: BTreeMap<SourceSystem, usize> = BTreeMap::new();
        let mut compared = 0usize;
        let mut conflicts = Vec::new();

        for field in field_names {
            let holders: Vec<&ConsolidatedEntity> = group.iter().copied().filter(|e| e.field(field).is_some()).collect();
            let Some(winner) = holders.first() else {
                continue;
            };
            if let Some(value) = winner.field(field) {
                attributes.insert(field.clone(), value.clone());
            }
            let source = winner
                .field_sources
                .get(field)
                .or_else(|| winner.sources.first());
            if let Some(source) = source {
                *supplied.entry(source.clone()).or_default() += 1;
            }

            if holders.len() > 1 {
                compared += 1;
                let first = holders[0].field(field).map(comparable);
                if holders.iter().skip(1).any(|h| h.field(field).map(comparable) != first) {
                    conflicts.push(field.clone());
                }
            }
        }

        let sources: BTreeSet<&SourceSystem> = group.iter().flat_map(|e| e.sources.iter()).collect();
        let agreement_ratio = if compared == 0 {
            0.0
        } else {
            (compared - conflicts.len()) as f64 / compared as f64
        };
        let confidence_score = round4(
            (0.50 + 0.10 * sources.len().saturating_sub(1) as f64 + 0.40 * agreement_ratio).clamp(0.0, 1.0),
        );

        let primary_source = supplied
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(s, _)| s.clone());

        MasterEntity {
            master_id: MasterId::derive(entity_type, &anchor_key),
            entity_type,
            anchor_key,
            attributes,
            confidence_score,
            source_count: sources.len(),
            primary_source,
            member_keys,
            conflicts,
        }
    }
}

fn comparable(value: &serde_json::Value) -> String {
    scalar_text(value).map_or_else(|| value.to_string(), |s| normalize_key(&s))
}

/// Groups entities sharing any normalized token in `fields`, transitively.
/// Entities without tokens form singleton groups. Groups come back ordered
/// by their smallest member.
fn group_by_tokens<'a>(entities: &[&'a ConsolidatedEntity], fields: &[String]) -> Vec<Vec<&'a ConsolidatedEntity>> {
    let mut sets = DisjointSet::new(entities.len());
    let mut seen: HashMap<(&str, String), usize> = HashMap::new();
    for (idx, entity) in entities.iter().enumerate() {
        for field in fields {
            if let Some(token) = entity.token(field) {
                match seen.get(&(field.as_str(), token.clone())) {
                    Some(&first) => sets.union(first, idx),
                    None => {
                        seen.insert((field.as_str(), token), idx);
                    }
                }
            }
        }
    }

    let mut by_root: BTreeMap<usize, Vec<&'a ConsolidatedEntity>> = BTreeMap::new();
    let mut order: Vec<usize> = Vec::new();
    for (idx, entity) in entities.iter().enumerate() {
        let root = sets.find(idx);
        let group = by_root.entry(root).or_default();
        if group.is_empty() {
            order.push(root);
        }
        group.push(*entity);
    }
    order
        .into_iter()
        .filter_map(|root| by_root.remove(&root))
        .collect()
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut idx: usize) -> usize {
        while self.parent[idx] != idx {
            self.parent[idx] = self.parent[self.parent[idx]];
            idx = self.parent[idx];
        }
        idx
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}
