//! Data-quality scoring.
//!
//! Each entity type carries a static checklist of weighted predicates. The
//! score starts at 1.0, loses the weight of every failed predicate and is
//! clamped to [0.0, 1.0]; each failure also raises a named flag. The score is
//! advisory: it never blocks a merge.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::consolidated::ConsolidatedEntity;
use crate::entity::EntityType;
use crate::error::ValidationError;

/// A quality predicate. The rule fails when the predicate holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum QualityCheck {
    /// The field is absent or null.
    Missing {
        field: String,
    },
    /// The field is absent, blank, or an empty list.
    Empty {
        field: String,
    },
    /// The field is present but its text does not match `pattern`.
    Pattern {
        field: String,
        pattern: String,
    },
    /// Fewer than `count` distinct sources contributed.
    MinSources {
        count: usize,
    },
}

/// One weighted checklist entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRule {
    pub flag: String,
    pub weight: f64,
    #[serde(flatten)]
    pub check: QualityCheck,
}

/// Checklist for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRuleSet {
    pub entity_type: EntityType,
    pub rules: Vec<QualityRule>,
}

/// Checklists for every entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualityRules(Vec<QualityRuleSet>);

impl QualityRules {
    /// Builds a checklist table.
    #[must_use]
    pub fn new(sets: Vec<QualityRuleSet>) -> Self {
        Self(sets)
    }

    /// Returns the checklist for `entity_type`.
    #[must_use]
    pub fn for_type(&self, entity_type: EntityType) -> Option<&QualityRuleSet> {
        self.0.iter().find(|s| s.entity_type == entity_type)
    }

    /// Replaces the checklists of every entity type present in `overrides`.
    #[must_use]
    pub fn overlay(mut self, overrides: Vec<QualityRuleSet>) -> Self {
        for set in overrides {
            self.0.retain(|s| s.entity_type != set.entity_type);
            self.0.push(set);
        }
        self
    }
}

/// Result of scoring one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub score: f64,
    pub flags: Vec<String>,
}

struct CompiledRule {
    flag: String,
    weight: f64,
    check: QualityCheck,
    pattern: Option<Regex>,
}

/// Scores consolidated entities against compiled checklists.
pub struct QualityScorer {
    sets: Vec<(EntityType, Vec<CompiledRule>)>,
}

impl std::fmt::Debug for QualityScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityScorer")
            .field("entity_types", &self.sets.iter().map(|(t, r)| (t, r.len())).collect::<Vec<_>>())
            .finish()
    }
}

impl QualityScorer {
    /// Compiles the checklists.
    ///
    /// # Errors
    ///
    /// Rejects negative or non-finite weights, empty flags and invalid regexes.
    pub fn new(rules: &QualityRules) -> Result<Self, ValidationError> {
        let mut sets = Vec::with_capacity(rules.0.len());
        for set in &rules.0 {
            let mut compiled = Vec::with_capacity(set.rules.len());
            for rule in &set.rules {
                if rule.flag.trim().is_empty() {
                    return Err(ValidationError::InvalidConfig {
                        reason: format!("{} quality rule with empty flag", set.entity_type),
                    });
                }
                if !rule.weight.is_finite() || rule.weight < 0.0 {
                    return Err(ValidationError::InvalidConfig {
                        reason: format!("quality weight for '{}' must be >= 0 (got {})", rule.flag, rule.weight),
                    });
                }
                let pattern = match &rule.check {
                    QualityCheck::Pattern { pattern, .. } => {
                        Some(Regex::new(pattern).map_err(|e| ValidationError::InvalidPattern {
                            pattern: pattern.clone(),
                            reason: e.to_string(),
                        })?)
                    }
                    _ => None,
                };
                compiled.push(CompiledRule {
                    flag: rule.flag.clone(),
                    weight: rule.weight,
                    check: rule.check.clone(),
                    pattern,
                });
            }
            sets.push((set.entity_type, compiled));
        }
        Ok(Self { sets })
    }

    /// Evaluates the checklist for `entity`.
    #[must_use]
    pub fn evaluate(&self, entity: &ConsolidatedEntity) -> QualityReport {
        let Some((_, rules)) = self.sets.iter().find(|(t, _)| *t == entity.entity_type) else {
            return QualityReport {
                score: 1.0,
                flags: Vec::new(),
            };
        };

        let mut penalty = 0.0;
        let mut flags = Vec::new();
        for rule in rules {
            if fails(rule, entity) {
                penalty += rule.weight;
                flags.push(rule.flag.clone());
            }
        }
        flags.sort();
        flags.dedup();

        QualityReport {
            score: round4((1.0 - penalty).clamp(0.0, 1.0)),
            flags,
        }
    }

    /// Writes the score and flags onto `entity`.
    pub fn apply(&self, entity: &mut ConsolidatedEntity) {
        let report = self.evaluate(entity);
        entity.quality_score = report.score;
        entity.quality_flags = report.flags;
    }
}

fn fails(rule: &CompiledRule, entity: &ConsolidatedEntity) -> bool {
    match &rule.check {
        QualityCheck::Missing { field } => entity.field(field).is_none(),
        QualityCheck::Empty { field } => match entity.field(field) {
            None => true,
            Some(serde_json::Value::String(s)) => s.trim().is_empty(),
            Some(serde_json::Value::Array(items)) => items.is_empty(),
            Some(_) => false,
        },
        QualityCheck::Pattern { field, .. } => match (entity.text(field), &rule.pattern) {
            (Some(text), Some(re)) => !re.is_match(&text),
            _ => false,
        },
        QualityCheck::MinSources { count } => entity.sources.len() < *count,
    }
}

pub(crate) fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn rule(flag: &str, weight: f64, check: QualityCheck) -> QualityRule {
    QualityRule {
        flag: flag.to_string(),
        weight,
        check,
    }
}

fn missing(field: &str) -> QualityCheck {
    QualityCheck::Missing {
        field: field.to_string(),
    }
}

fn empty(field: &str) -> QualityCheck {
    QualityCheck::Empty {
        field: field.to_string(),
    }
}

impl Default for QualityRules {
    fn default() -> Self {
        let single_source = || rule("single_source", 0.10, QualityCheck::MinSources { count: 2 });

        Self(vec![
            QualityRuleSet {
                entity_type: EntityType::Person,
                rules: vec![
                    rule("missing_email", 0.25, missing("email")),
                    rule("missing_name", 0.20, missing("display_name")),
                    rule("missing_department", 0.15, missing("department_id")),
                    rule("missing_job_title", 0.10, missing("job_title")),
                    rule(
                        "invalid_email",
                        0.10,
                        QualityCheck::Pattern {
                            field: "email".to_string(),
                            pattern: r"^[^@\s]+@[^@\s]+\.[^@\s]+$".to_string(),
                        },
                    ),
                    single_source(),
                ],
            },
            QualityRuleSet {
                entity_type: EntityType::Department,
                rules: vec![
                    rule("missing_name", 0.30, missing("name")),
                    rule("missing_parent", 0.15, missing("parent_id")),
                    rule("missing_college", 0.10, missing("college")),
                    single_source(),
                ],
            },
            QualityRuleSet {
                entity_type: EntityType::ComputingAsset,
                rules: vec![
                    rule("missing_owner", 0.25, missing("owner")),
                    rule("missing_serial", 0.15, missing("serial_number")),
                    rule("missing_os", 0.10, missing("os")),
                    rule("missing_last_seen", 0.10, missing("last_seen")),
                    rule("missing_directory_path", 0.10, missing("distinguished_name")),
                    single_source(),
                ],
            },
            QualityRuleSet {
                entity_type: EntityType::Lab,
                rules: vec![
                    rule("no_members", 0.20, empty("members")),
                    rule("missing_name", 0.15, missing("name")),
                    rule("missing_ou", 0.15, missing("ou_dn")),
                    rule("missing_department", 0.15, missing("department_id")),
                    rule("no_grant_funding", 0.05, missing("total_grant_dollars")),
                    single_source(),
                ],
            },
        ])
    }
}
