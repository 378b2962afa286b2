//! Discovery methods and their settings.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::adjust::AdjustmentRule;
use super::profile::{AssetProfile, LabProfile, ProfileFields};
use super::DiscoveryMethod;
use crate::error::ValidationError;

/// Base confidence of each discovery method before adjustments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseConfidences {
    pub ou_containment: f64,
    pub owner_is_pi: f64,
    pub financial_owner_is_pi: f64,
    pub name_pattern: f64,
    pub owner_is_member: f64,
    pub last_user_is_member: f64,
    pub group_membership: f64,
}

impl Default for BaseConfidences {
    fn default() -> Self {
        Self {
            ou_containment: 0.90,
            owner_is_pi: 0.85,
            financial_owner_is_pi: 0.80,
            name_pattern: 0.75,
            owner_is_member: 0.40,
            last_user_is_member: 0.30,
            group_membership: 0.35,
        }
    }
}

impl BaseConfidences {
    #[must_use]
    pub const fn get(&self, method: DiscoveryMethod) -> f64 {
        match method {
            DiscoveryMethod::OuContainment => self.ou_containment,
            DiscoveryMethod::OwnerIsPi => self.owner_is_pi,
            DiscoveryMethod::FinancialOwnerIsPi => self.financial_owner_is_pi,
            DiscoveryMethod::NamePattern => self.name_pattern,
            DiscoveryMethod::OwnerIsMember => self.owner_is_member,
            DiscoveryMethod::LastUserIsMember => self.last_user_is_member,
            DiscoveryMethod::GroupMembership => self.group_membership,
        }
    }
}

/// Tunables of the relationship discovery engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub base_confidence: BaseConfidences,
    pub adjustments: Vec<AdjustmentRule>,
    pub profile: ProfileFields,
    /// Domain assumed for labs that declare none.
    pub default_domain: String,
    /// Identity tokens shorter than this never match names or groups.
    pub min_token_len: usize,
    /// Rows strictly below this confidence are flagged `low_confidence`.
    pub low_confidence_below: f64,
    /// Rows at or above this confidence are flagged `high_confidence`.
    pub high_confidence_at: f64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            base_confidence: BaseConfidences::default(),
            adjustments: AdjustmentRule::defaults(),
            profile: ProfileFields::default(),
            default_domain: "research".to_string(),
            min_token_len: 3,
            low_confidence_below: 0.40,
            high_confidence_at: 0.90,
        }
    }
}

impl DiscoverySettings {
    /// Checks ranges and thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: String| Err(ValidationError::InvalidConfig { reason });

        for method in DiscoveryMethod::ALL {
            let base = self.base_confidence.get(method);
            if !(0.0..=1.0).contains(&base) {
                return invalid(format!("base confidence for {method} must be within [0, 1] (got {base})"));
            }
        }
        for rule in &self.adjustments {
            if !rule.strong_delta.is_finite() || !rule.weak_delta.is_finite() {
                return invalid(format!("adjustment '{}' has a non-finite delta", rule.name));
            }
        }
        for (name, value) in [
            ("low_confidence_below", self.low_confidence_below),
            ("high_confidence_at", self.high_confidence_at),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be within [0, 1] (got {value})"));
            }
        }
        if self.low_confidence_below > self.high_confidence_at {
            return invalid("low_confidence_below exceeds high_confidence_at".to_string());
        }
        if self.min_token_len == 0 {
            return invalid("min_token_len must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Runs one method over a (lab, asset) pair. Returns the method-specific
/// evidence when it fires.
pub(crate) fn fire(method: DiscoveryMethod, lab: &LabProfile, asset: &AssetProfile) -> Option<serde_json::Value> {
    match method {
        DiscoveryMethod::OuContainment => {
            let (ou, path) = (lab.ou.as_deref()?, asset.path.as_deref()?);
            let nested = path.len() > ou.len() && path.ends_with(ou) && path[..path.len() - ou.len()].ends_with(',');
            nested.then(|| json!({"asset_path": path, "lab_ou": ou}))
        }
        DiscoveryMethod::OwnerIsPi => {
            let owner = asset.owner.as_deref()?;
            (owner == lab.pi).then(|| json!({"owner": owner}))
        }
        DiscoveryMethod::FinancialOwnerIsPi => {
            let owner = asset.financial_owner.as_deref()?;
            (owner == lab.pi).then(|| json!({"financial_owner": owner}))
        }
        DiscoveryMethod::NamePattern => lab
            .token_in(&asset.name)
            .then(|| json!({"asset_name": asset.name, "token": lab.pi})),
        DiscoveryMethod::OwnerIsMember => {
            let owner = asset.owner.as_deref()?;
            lab.is_member_not_pi(owner).then(|| json!({"owner": owner}))
        }
        DiscoveryMethod::LastUserIsMember => {
            let user = asset.last_user.as_deref()?;
            lab.is_member_not_pi(user).then(|| json!({"last_user": user}))
        }
        DiscoveryMethod::GroupMembership => {
            let group = asset
                .groups
                .iter()
                .find(|g| lab.groups.contains(*g) || lab.token_in(g))?;
            Some(json!({"group": group}))
        }
    }
}
