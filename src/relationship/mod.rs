//! Relationship discovery between labs (subjects) and computing assets
//! (objects).
//!
//! Every discovery method runs independently over each (lab, asset) pair. A
//! firing method yields one candidate with a method-specific base confidence;
//! additive adjustments from other evidence are summed, the result is clamped
//! to the method's tier bounds, and each asset's rows are ranked so exactly
//! one of them is primary. A pass is a pure function of the consolidated
//! entities it reads.

mod adjust;
mod discovery;
mod engine;
mod profile;
mod ranking;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::ConsolidatedId;

pub use adjust::{AdjustmentCondition, AdjustmentRule};
pub use discovery::{BaseConfidences, DiscoverySettings};
pub use engine::RelationshipEngine;
pub use profile::{AssetProfile, LabProfile, ProfileFields};
pub use ranking::{enforce_tier_bounds, rank_object};

const RELATIONSHIP_NAMESPACE: Uuid = Uuid::from_u128(0x9a3d_52c7_e41f_4b86_b07a_3c5e_d2f9_8614);

/// Confidence band reflecting a method's inherent evidentiary strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Strong,
    Weak,
}

impl Tier {
    /// Inclusive confidence bounds of the tier.
    #[must_use]
    pub const fn bounds(self) -> (f64, f64) {
        match self {
            Self::Strong => (0.70, 1.00),
            Self::Weak => (0.20, 0.50),
        }
    }

    /// Clamps `value` into the tier bounds.
    #[must_use]
    pub fn clamp(self, value: f64) -> f64 {
        let (lo, hi) = self.bounds();
        if value.is_nan() {
            return lo;
        }
        value.clamp(lo, hi)
    }

    /// Returns true if `value` lies within the tier bounds.
    #[must_use]
    pub fn contains(self, value: f64) -> bool {
        let (lo, hi) = self.bounds();
        (lo..=hi).contains(&value)
    }
}

/// How a relationship was discovered.
///
/// Declaration order is the fixed tie-break priority used when ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    /// The asset's directory path nests under the lab's OU.
    OuContainment,
    /// The asset's registered owner is the PI.
    OwnerIsPi,
    /// The asset's financial owner is the PI.
    FinancialOwnerIsPi,
    /// The asset name contains the lab's identity token.
    NamePattern,
    /// The asset's owner is a lab member other than the PI.
    OwnerIsMember,
    /// The asset's last active user is a lab member other than the PI.
    LastUserIsMember,
    /// The asset sits in a directory group named for the lab.
    GroupMembership,
}

impl DiscoveryMethod {
    /// All methods in priority order.
    pub const ALL: [Self; 7] = [
        Self::OuContainment,
        Self::OwnerIsPi,
        Self::FinancialOwnerIsPi,
        Self::NamePattern,
        Self::OwnerIsMember,
        Self::LastUserIsMember,
        Self::GroupMembership,
    ];

    #[must_use]
    pub const fn tier(self) -> Tier {
        match self {
            Self::OuContainment | Self::OwnerIsPi | Self::FinancialOwnerIsPi | Self::NamePattern => Tier::Strong,
            Self::OwnerIsMember | Self::LastUserIsMember | Self::GroupMembership => Tier::Weak,
        }
    }

    /// Position in the tie-break order; lower ranks first.
    #[must_use]
    pub const fn priority(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OuContainment => "ou_containment",
            Self::OwnerIsPi => "owner_is_pi",
            Self::FinancialOwnerIsPi => "financial_owner_is_pi",
            Self::NamePattern => "name_pattern",
            Self::OwnerIsMember => "owner_is_member",
            Self::LastUserIsMember => "last_user_is_member",
            Self::GroupMembership => "group_membership",
        }
    }
}

impl fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identifier of a relationship row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipId(Uuid);

impl RelationshipId {
    /// Derives the id from the (subject, object, method) triple.
    #[must_use]
    pub fn derive(subject: ConsolidatedId, object: ConsolidatedId, method: DiscoveryMethod) -> Self {
        let name = format!("{subject}|{object}|{method}");
        Self(Uuid::new_v5(&RELATIONSHIP_NAMESPACE, name.as_bytes()))
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An inferred lab ↔ computing-asset association.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub subject_id: ConsolidatedId,
    /// Natural key of the lab.
    pub subject_key: String,
    pub object_id: ConsolidatedId,
    /// Natural key of the computing asset.
    pub object_key: String,
    pub discovery_method: DiscoveryMethod,
    /// Final confidence, always inside the method's tier bounds.
    pub confidence: f64,
    pub evidence: serde_json::Value,
    pub is_primary: bool,
    #[serde(default)]
    pub quality_flags: Vec<String>,
}

impl Relationship {
    #[must_use]
    pub fn tier(&self) -> Tier {
        self.discovery_method.tier()
    }

    #[must_use]
    pub fn has_flag(&self, flag: &str) -> bool {
        self.quality_flags.iter().any(|f| f == flag)
    }
}
