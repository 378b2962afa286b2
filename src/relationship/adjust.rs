//! Additive confidence adjustments.
//!
//! Every rule whose condition holds contributes its tier-specific delta. The
//! deltas are summed before clamping, so evaluation order never matters and
//! no rule short-circuits another. A rule never applies to a method whose own
//! evidence it restates.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::profile::{AssetProfile, LabProfile};
use super::{DiscoveryMethod, Tier};

/// Evidence an adjustment rule looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum AdjustmentCondition {
    /// The asset's function mentions the lab's domain.
    FunctionMatchesDomain,
    /// The asset's function mentions one of `values`.
    FunctionIn { values: Vec<String> },
    /// An owner is known and none is the PI or a member.
    OwnerNotAffiliated,
    /// Owner and financial owner both name the PI.
    FullyOwned,
}

impl AdjustmentCondition {
    /// Returns true when the condition holds for the pair.
    #[must_use]
    pub fn holds(&self, lab: &LabProfile, asset: &AssetProfile) -> bool {
        match self {
            Self::FunctionMatchesDomain => asset.function_words().any(|w| w == lab.domain),
            Self::FunctionIn { values } => asset
                .function_words()
                .any(|w| values.iter().any(|v| v.eq_ignore_ascii_case(w))),
            Self::OwnerNotAffiliated => asset.owner_not_affiliated(lab),
            Self::FullyOwned => asset.fully_owned_by(lab),
        }
    }

    /// Returns true when the condition reads the same evidence `method`
    /// fired on.
    #[must_use]
    pub const fn restates(&self, method: DiscoveryMethod) -> bool {
        matches!(
            (self, method),
            (Self::FullyOwned, DiscoveryMethod::OwnerIsPi | DiscoveryMethod::FinancialOwnerIsPi)
        )
    }
}

/// A named bonus or penalty with separate deltas per tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRule {
    pub name: String,
    #[serde(flatten)]
    pub condition: AdjustmentCondition,
    pub strong_delta: f64,
    pub weak_delta: f64,
}

impl AdjustmentRule {
    #[must_use]
    pub const fn delta(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Strong => self.strong_delta,
            Tier::Weak => self.weak_delta,
        }
    }

    /// Built-in rule table.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self {
                name: "research_function".to_string(),
                condition: AdjustmentCondition::FunctionMatchesDomain,
                strong_delta: 0.05,
                weak_delta: 0.05,
            },
            // Shared-use machines are less likely to belong to one lab, but a
            // group match on a shared-use machine is still a usable signal.
            Self {
                name: "shared_use_function".to_string(),
                condition: AdjustmentCondition::FunctionIn {
                    values: ["classroom", "instructional", "administrative", "admin", "kiosk"]
                        .into_iter()
                        .map(String::from)
                        .collect(),
                },
                strong_delta: -0.10,
                weak_delta: 0.05,
            },
            Self {
                name: "owner_not_affiliated".to_string(),
                condition: AdjustmentCondition::OwnerNotAffiliated,
                strong_delta: -0.15,
                weak_delta: -0.15,
            },
            Self {
                name: "fully_owned".to_string(),
                condition: AdjustmentCondition::FullyOwned,
                strong_delta: 0.05,
                weak_delta: 0.0,
            },
        ]
    }
}

/// Sums the deltas of every rule that holds for a candidate found by
/// `method`. Returns the total and the applied rules as evidence.
pub(crate) fn evaluate(
    rules: &[AdjustmentRule],
    method: DiscoveryMethod,
    lab: &LabProfile,
    asset: &AssetProfile,
) -> (f64, Vec<serde_json::Value>) {
    let tier = method.tier();
    let mut total = 0.0;
    let mut applied = Vec::new();
    for rule in rules {
        if rule.condition.restates(method) || !rule.condition.holds(lab, asset) {
            continue;
        }
        let delta = rule.delta(tier);
        total += delta;
        applied.push(json!({"rule": rule.name, "delta": delta}));
    }
    (total, applied)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::consolidated::ConsolidatedEntity;
    use crate::entity::{ConsolidatedId, EntityType};
    use crate::relationship::ProfileFields;
    use crate::source::SourceSystem;

    fn pair(asset_fields: serde_json::Value) -> (LabProfile, AssetProfile) {
        let build = |t: EntityType, key: &str, fields: serde_json::Value| ConsolidatedEntity {
            id: ConsolidatedId::derive(t, key),
            entity_type: t,
            natural_key: key.to_string(),
            fields: serde_json::from_value::<BTreeMap<String, serde_json::Value>>(fields).unwrap(),
            field_sources: BTreeMap::new(),
            sources: vec![SourceSystem::Ticketing],
            contributions: Vec::new(),
            quality_score: 1.0,
            quality_flags: Vec::new(),
            updated_at: Utc::now(),
        };
        let lab = build(EntityType::Lab, "jdoe", json!({"pi_uniqname": "jdoe", "members": ["akim"]}));
        let asset = build(EntityType::ComputingAsset, "classroom-12", asset_fields);
        let fields = ProfileFields::default();
        (
            LabProfile::from_entity(&lab, &fields, "research", 3),
            AssetProfile::from_entity(&asset, &fields),
        )
    }

    #[test]
    fn test_summation_is_order_independent() {
        let (lab, asset) = pair(json!({"function": "Research / Classroom", "owner": "zzz"}));
        let rules = AdjustmentRule::defaults();
        let mut reversed = rules.clone();
        reversed.reverse();

        let (forward, applied) = evaluate(&rules, DiscoveryMethod::OuContainment, &lab, &asset);
        let (backward, _) = evaluate(&reversed, DiscoveryMethod::OuContainment, &lab, &asset);
        assert!((forward - backward).abs() < 1e-12);
        assert_eq!(applied.len(), 3);
        assert!((forward - (0.05 - 0.10 - 0.15)).abs() < 1e-12);
    }

    #[test]
    fn test_classroom_is_a_weak_bonus() {
        let (lab, asset) = pair(json!({"function": "classroom"}));
        let (total, _) = evaluate(&AdjustmentRule::defaults(), DiscoveryMethod::GroupMembership, &lab, &asset);
        assert!((total - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_nothing_applies_without_evidence() {
        let (lab, asset) = pair(json!({}));
        let (total, applied) = evaluate(&AdjustmentRule::defaults(), DiscoveryMethod::NamePattern, &lab, &asset);
        assert_eq!(total, 0.0);
        assert!(applied.is_empty());
    }

    #[test]
    fn test_fully_owned_skips_ownership_methods() {
        let (lab, asset) = pair(json!({"owner": "jdoe", "financial_owner": "jdoe"}));
        let rules = AdjustmentRule::defaults();

        for method in [DiscoveryMethod::OwnerIsPi, DiscoveryMethod::FinancialOwnerIsPi] {
            let (total, applied) = evaluate(&rules, method, &lab, &asset);
            assert_eq!(total, 0.0, "{method}");
            assert!(applied.is_empty());
        }

        let (total, applied) = evaluate(&rules, DiscoveryMethod::NamePattern, &lab, &asset);
        assert!((total - 0.05).abs() < 1e-12);
        assert_eq!(applied[0]["rule"], json!("fully_owned"));
    }

    #[test]
    fn test_rule_toml_shape() {
        let rule: AdjustmentRule = toml::from_str(
            r#"
            name = "kiosk_penalty"
            when = "function_in"
            values = ["kiosk"]
            strong_delta = -0.2
            weak_delta = -0.1
            "#,
        )
        .unwrap();
        assert_eq!(
            rule.condition,
            AdjustmentCondition::FunctionIn {
                values: vec!["kiosk".to_string()]
            }
        );
    }
}
