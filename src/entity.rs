//! Entity types and derived identifiers.
//!
//! Consolidated and master records are rebuilt from scratch on every pass, so
//! their identifiers are derived deterministically (UUID v5) from the entity
//! type and natural key. Rerunning a pass over the same raw snapshot yields
//! the same ids.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

const CONSOLIDATED_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_93b7_4d0a_8c55_1e2f_7a90_c3d1);
const MASTER_NAMESPACE: Uuid = Uuid::from_u128(0x2b8e_71d4_05c9_4f6e_a13b_9d0c_64e8_f215);

/// Kind of consolidated entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A human person (staff, faculty, student).
    Person,
    /// An organizational unit.
    Department,
    /// A computer or other managed device.
    ComputingAsset,
    /// A PI-led research group.
    Lab,
}

impl EntityType {
    /// All entity types, in reconciliation order.
    pub const ALL: [Self; 4] = [Self::Department, Self::Person, Self::Lab, Self::ComputingAsset];

    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Department => "department",
            Self::ComputingAsset => "computing_asset",
            Self::Lab => "lab",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "person" | "people" => Ok(Self::Person),
            "department" | "dept" => Ok(Self::Department),
            "computing_asset" | "computer" | "asset" => Ok(Self::ComputingAsset),
            "lab" => Ok(Self::Lab),
            _ => Err(ValidationError::UnknownEntityType {
                name: s.to_string(),
            }),
        }
    }
}

/// Normalizes a natural key: trims, lowercases and collapses whitespace.
#[must_use]
pub fn normalize_key(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Stable identifier of a consolidated entity.
///
/// # Examples
///
/// ```
/// use recondb::{ConsolidatedId, EntityType};
///
/// let a = ConsolidatedId::derive(EntityType::Lab, "jsmith");
/// let b = ConsolidatedId::derive(EntityType::Lab, "jsmith");
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsolidatedId(Uuid);

impl ConsolidatedId {
    /// Derives the id for a natural key of the given type.
    #[must_use]
    pub fn derive(entity_type: EntityType, natural_key: &str) -> Self {
        let name = format!("{entity_type}:{natural_key}");
        Self(Uuid::new_v5(&CONSOLIDATED_NAMESPACE, name.as_bytes()))
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ConsolidatedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier of a master (golden) record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MasterId(Uuid);

impl MasterId {
    /// Derives the id for a group anchored at `anchor_key`.
    #[must_use]
    pub fn derive(entity_type: EntityType, anchor_key: &str) -> Self {
        let name = format!("{entity_type}:{anchor_key}");
        Self(Uuid::new_v5(&MASTER_NAMESPACE, name.as_bytes()))
    }
}

impl fmt::Display for MasterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_roundtrip() {
        for t in EntityType::ALL {
            assert_eq!(t.as_str().parse::<EntityType>().unwrap(), t);
        }
        assert!("printer".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_entity_type_serde_snake_case() {
        let json = serde_json::to_string(&EntityType::ComputingAsset).unwrap();
        assert_eq!(json, "\"computing_asset\"");
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("  JSmith "), "jsmith");
        assert_eq!(normalize_key("Chem  Lab\t3"), "chem lab 3");
    }

    #[test]
    fn test_ids_depend_on_type() {
        let lab = ConsolidatedId::derive(EntityType::Lab, "jsmith");
        let person = ConsolidatedId::derive(EntityType::Person, "jsmith");
        assert_ne!(lab, person);
        assert_ne!(
            MasterId::derive(EntityType::Lab, "jsmith").to_string(),
            lab.to_string()
        );
    }
}
