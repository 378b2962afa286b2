//! Ranking, primary selection and tier-bound enforcement.

use std::cmp::Ordering;

use tracing::warn;

use super::Relationship;

/// Orders the rows of one object and marks the top row primary.
///
/// Rows sort by confidence descending, then method priority, then subject
/// key. Exactly one row is primary when `rows` is non-empty.
pub fn rank_object(rows: &mut [Relationship]) {
    rows.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.discovery_method.priority().cmp(&b.discovery_method.priority()))
            .then_with(|| a.subject_key.cmp(&b.subject_key))
    });
    for (idx, row) in rows.iter_mut().enumerate() {
        row.is_primary = idx == 0;
    }
}

/// Clamps any confidence that escaped its tier. Returns the number of rows
/// corrected.
pub fn enforce_tier_bounds(rows: &mut [Relationship]) -> usize {
    let mut corrected = 0;
    for row in rows.iter_mut() {
        let tier = row.tier();
        if tier.contains(row.confidence) {
            continue;
        }
        let clamped = tier.clamp(row.confidence);
        warn!(
            subject = %row.subject_key,
            object = %row.object_key,
            method = %row.discovery_method,
            confidence = row.confidence,
            clamped,
            "relationship confidence escaped its tier bounds"
        );
        row.confidence = clamped;
        corrected += 1;
    }
    corrected
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::entity::{ConsolidatedId, EntityType};
    use crate::relationship::{DiscoveryMethod, RelationshipId};

    fn row(lab: &str, method: DiscoveryMethod, confidence: f64) -> Relationship {
        let subject_id = ConsolidatedId::derive(EntityType::Lab, lab);
        let object_id = ConsolidatedId::derive(EntityType::ComputingAsset, "pc-1");
        Relationship {
            id: RelationshipId::derive(subject_id, object_id, method),
            subject_id,
            subject_key: lab.to_string(),
            object_id,
            object_key: "pc-1".to_string(),
            discovery_method: method,
            confidence,
            evidence: json!({}),
            is_primary: false,
            quality_flags: Vec::new(),
        }
    }

    #[test]
    fn test_single_primary_on_top_row() {
        let mut rows = vec![
            row("jdoe", DiscoveryMethod::GroupMembership, 0.50),
            row("jsmith", DiscoveryMethod::OwnerIsPi, 0.85),
            row("jsmith", DiscoveryMethod::OuContainment, 0.90),
        ];
        rank_object(&mut rows);
        assert_eq!(rows.iter().filter(|r| r.is_primary).count(), 1);
        assert_eq!(rows[0].discovery_method, DiscoveryMethod::OuContainment);
        assert!(rows[0].is_primary);
    }

    #[test]
    fn test_ties_break_by_method_then_subject() {
        let mut rows = vec![
            row("zlab", DiscoveryMethod::NamePattern, 0.80),
            row("alab", DiscoveryMethod::NamePattern, 0.80),
            row("mlab", DiscoveryMethod::FinancialOwnerIsPi, 0.80),
        ];
        rank_object(&mut rows);
        let order: Vec<&str> = rows.iter().map(|r| r.subject_key.as_str()).collect();
        assert_eq!(order, vec!["mlab", "alab", "zlab"]);
    }

    #[test]
    fn test_enforce_clamps_escaped_rows() {
        let mut rows = vec![
            row("jdoe", DiscoveryMethod::GroupMembership, 0.75),
            row("jsmith", DiscoveryMethod::OwnerIsPi, 0.55),
            row("akim", DiscoveryMethod::LastUserIsMember, 0.30),
        ];
        assert_eq!(enforce_tier_bounds(&mut rows), 2);
        assert_eq!(rows[0].confidence, 0.50);
        assert_eq!(rows[1].confidence, 0.70);
        assert_eq!(rows[2].confidence, 0.30);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(0.35 + 0.05), 0.40);
        assert_eq!(round2(0.90 + 0.05), 0.95);
    }
}
