use serde_json::json;
use tracing::debug;

use super::adjust::evaluate;
use super::discovery::{fire, DiscoverySettings};
use super::profile::{AssetProfile, LabProfile};
use super::ranking::{enforce_tier_bounds, rank_object, round2};
use super::{DiscoveryMethod, Relationship, RelationshipId};
use crate::consolidated::ConsolidatedEntity;
use crate::error::ValidationError;

/// Discovers and ranks lab ↔ computing-asset relationships.
#[derive(Debug, Clone, Default)]
pub struct RelationshipEngine {
    settings: DiscoverySettings,
}

impl RelationshipEngine {
    /// Creates an engine after validating `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] for out-of-range settings.
    pub fn new(settings: DiscoverySettings) -> Result<Self, ValidationError> {
        settings.validate()?;
        Ok(Self { settings })
    }

    #[must_use]
    pub fn settings(&self) -> &DiscoverySettings {
        &self.settings
    }

    /// Projects consolidated labs onto discovery profiles.
    #[must_use]
    pub fn lab_profiles(&self, labs: &[ConsolidatedEntity]) -> Vec<LabProfile> {
        labs.iter()
            .map(|lab| {
                LabProfile::from_entity(
                    lab,
                    &self.settings.profile,
                    &self.settings.default_domain,
                    self.settings.min_token_len,
                )
            })
            .collect()
    }

    #[must_use]
    pub fn asset_profile(&self, asset: &ConsolidatedEntity) -> AssetProfile {
        AssetProfile::from_entity(asset, &self.settings.profile)
    }

    /// Runs every method against every lab for one asset, then clamps,
    /// flags and ranks the rows. An asset matching nothing yields no rows.
    #[must_use]
    pub fn discover_for_object(&self, asset: &AssetProfile, labs: &[LabProfile]) -> Vec<Relationship> {
        let mut rows = Vec::new();
        for lab in labs {
            for method in DiscoveryMethod::ALL {
                if let Some(evidence) = fire(method, lab, asset) {
                    rows.push(self.candidate(method, lab, asset, evidence));
                }
            }
        }
        if rows.is_empty() {
            return rows;
        }

        enforce_tier_bounds(&mut rows);
        rank_object(&mut rows);
        debug!(
            object = %asset.key,
            rows = rows.len(),
            primary = %rows[0].subject_key,
            method = %rows[0].discovery_method,
            "ranked relationships"
        );
        rows
    }

    /// Discovers relationships for every asset, sequentially.
    ///
    /// Rows are grouped by asset key in ascending order, each group in rank
    /// order.
    #[must_use]
    pub fn discover(&self, labs: &[ConsolidatedEntity], assets: &[ConsolidatedEntity]) -> Vec<Relationship> {
        let labs = self.lab_profiles(labs);
        let mut assets: Vec<AssetProfile> = assets.iter().map(|a| self.asset_profile(a)).collect();
        assets.sort_by(|a, b| a.key.cmp(&b.key));
        assets
            .iter()
            .flat_map(|asset| self.discover_for_object(asset, &labs))
            .collect()
    }

    fn candidate(
        &self,
        method: DiscoveryMethod,
        lab: &LabProfile,
        asset: &AssetProfile,
        method_evidence: serde_json::Value,
    ) -> Relationship {
        let tier = method.tier();
        let base = self.settings.base_confidence.get(method);
        let (delta, adjustments) = evaluate(&self.settings.adjustments, method, lab, asset);
        let raw = base + delta;
        let confidence = round2(tier.clamp(raw));

        let mut quality_flags = Vec::new();
        if confidence < self.settings.low_confidence_below {
            quality_flags.push("low_confidence".to_string());
        }
        if confidence >= self.settings.high_confidence_at {
            quality_flags.push("high_confidence".to_string());
        }
        if asset.fully_owned_by(lab) {
            quality_flags.push("fully_owned".to_string());
        }
        if asset.owner_not_affiliated(lab) {
            quality_flags.push("owner_not_affiliated".to_string());
        }
        quality_flags.sort();

        Relationship {
            id: RelationshipId::derive(lab.id, asset.id, method),
            subject_id: lab.id,
            subject_key: lab.key.clone(),
            object_id: asset.id,
            object_key: asset.key.clone(),
            discovery_method: method,
            confidence,
            evidence: json!({
                "tier": tier,
                "method": method_evidence,
                "base": base,
                "adjustments": adjustments,
                "raw": raw,
                "clamped": confidence,
            }),
            is_primary: false,
            quality_flags,
        }
    }
}
