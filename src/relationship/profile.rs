//! Projections of consolidated labs and assets onto the attributes discovery
//! reads.

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::consolidated::ConsolidatedEntity;
use crate::entity::{normalize_key, ConsolidatedId};

/// Which consolidated fields feed each profile attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileFields {
    pub lab_pi: String,
    pub lab_members: String,
    pub lab_ou: String,
    pub lab_groups: String,
    pub lab_domain: String,
    pub asset_name: String,
    pub asset_owner: String,
    pub asset_financial_owner: String,
    pub asset_last_user: String,
    pub asset_path: String,
    pub asset_groups: String,
    pub asset_function: String,
}

impl Default for ProfileFields {
    fn default() -> Self {
        Self {
            lab_pi: "pi_uniqname".to_string(),
            lab_members: "members".to_string(),
            lab_ou: "ou_dn".to_string(),
            lab_groups: "groups".to_string(),
            lab_domain: "domain".to_string(),
            asset_name: "name".to_string(),
            asset_owner: "owner".to_string(),
            asset_financial_owner: "financial_owner".to_string(),
            asset_last_user: "last_user".to_string(),
            asset_path: "distinguished_name".to_string(),
            asset_groups: "groups".to_string(),
            asset_function: "function".to_string(),
        }
    }
}

/// A lab as seen by the discovery methods.
#[derive(Debug, Clone)]
pub struct LabProfile {
    pub id: ConsolidatedId,
    pub key: String,
    /// Identity token: the PI uniqname, or the natural key when absent.
    pub pi: String,
    pub members: BTreeSet<String>,
    /// Normalized OU distinguished name.
    pub ou: Option<String>,
    pub groups: BTreeSet<String>,
    /// Research domain, lowercased.
    pub domain: String,
    /// Delimited match of the identity token; absent for tokens that are too
    /// short to match names reliably.
    pub(crate) token_pattern: Option<Regex>,
}

impl LabProfile {
    /// Builds a profile from a consolidated lab.
    #[must_use]
    pub fn from_entity(
        entity: &ConsolidatedEntity,
        fields: &ProfileFields,
        default_domain: &str,
        min_token_len: usize,
    ) -> Self {
        let pi = entity
            .token(&fields.lab_pi)
            .unwrap_or_else(|| entity.natural_key.clone());
        let token_pattern = token_regex(&pi, min_token_len);
        Self {
            id: entity.id,
            key: entity.natural_key.clone(),
            members: entity.tokens(&fields.lab_members, None).into_iter().collect(),
            ou: entity.text(&fields.lab_ou).map(|dn| normalize_dn(&dn)),
            groups: entity.tokens(&fields.lab_groups, None).into_iter().collect(),
            domain: entity
                .token(&fields.lab_domain)
                .unwrap_or_else(|| normalize_key(default_domain)),
            pi,
            token_pattern,
        }
    }

    /// Returns true if `uniqname` is the PI or a member.
    #[must_use]
    pub fn is_affiliated(&self, uniqname: &str) -> bool {
        uniqname == self.pi || self.members.contains(uniqname)
    }

    /// Returns true if `uniqname` is a member other than the PI.
    #[must_use]
    pub fn is_member_not_pi(&self, uniqname: &str) -> bool {
        uniqname != self.pi && self.members.contains(uniqname)
    }

    /// Returns true if `text` contains the identity token as a delimited word.
    #[must_use]
    pub fn token_in(&self, text: &str) -> bool {
        self.token_pattern.as_ref().is_some_and(|re| re.is_match(text))
    }
}

/// A computing asset as seen by the discovery methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetProfile {
    pub id: ConsolidatedId,
    pub key: String,
    pub name: String,
    pub owner: Option<String>,
    pub financial_owner: Option<String>,
    pub last_user: Option<String>,
    /// Normalized directory distinguished name.
    pub path: Option<String>,
    pub groups: BTreeSet<String>,
    pub function: Option<String>,
}

impl AssetProfile {
    /// Builds a profile from a consolidated computing asset.
    #[must_use]
    pub fn from_entity(entity: &ConsolidatedEntity, fields: &ProfileFields) -> Self {
        Self {
            id: entity.id,
            key: entity.natural_key.clone(),
            name: entity
                .token(&fields.asset_name)
                .unwrap_or_else(|| entity.natural_key.clone()),
            owner: entity.token(&fields.asset_owner),
            financial_owner: entity.token(&fields.asset_financial_owner),
            last_user: entity.token(&fields.asset_last_user),
            path: entity.text(&fields.asset_path).map(|dn| normalize_dn(&dn)),
            groups: entity.tokens(&fields.asset_groups, None).into_iter().collect(),
            function: entity.token(&fields.asset_function),
        }
    }

    /// Known owners: the registered owner and the financial owner.
    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.owner.iter().chain(self.financial_owner.iter()).map(String::as_str)
    }

    /// Returns true if at least one owner is known and none is affiliated
    /// with `lab`.
    #[must_use]
    pub fn owner_not_affiliated(&self, lab: &LabProfile) -> bool {
        let mut owners = self.owners().peekable();
        owners.peek().is_some() && owners.all(|o| !lab.is_affiliated(o))
    }

    /// Returns true if both ownership signals name the PI.
    #[must_use]
    pub fn fully_owned_by(&self, lab: &LabProfile) -> bool {
        self.owner.as_deref() == Some(lab.pi.as_str()) && self.financial_owner.as_deref() == Some(lab.pi.as_str())
    }

    /// Words of the function attribute.
    pub fn function_words(&self) -> impl Iterator<Item = &str> {
        self.function
            .as_deref()
            .unwrap_or_default()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
    }
}

/// Lowercases a distinguished name and strips spaces around separators.
#[must_use]
pub fn normalize_dn(dn: &str) -> String {
    dn.split(',')
        .map(|rdn| {
            rdn.split('=')
                .map(str::trim)
                .collect::<Vec<_>>()
                .join("=")
        })
        .filter(|rdn| !rdn.is_empty())
        .collect::<Vec<_>>()
        .join(",")
        .to_lowercase()
}

fn token_regex(token: &str, min_len: usize) -> Option<Regex> {
    if token.chars().count() < min_len {
        return None;
    }
    let pattern = format!(r"(?:^|[^a-z0-9]){}(?:[^a-z]|$)", regex::escape(token));
    Regex::new(&pattern).ok()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::entity::EntityType;
    use crate::source::SourceSystem;

    fn entity(entity_type: EntityType, key: &str, fields: &[(&str, serde_json::Value)]) -> ConsolidatedEntity {
        ConsolidatedEntity {
            id: ConsolidatedId::derive(entity_type, key),
            entity_type,
            natural_key: key.to_string(),
            fields: fields.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect(),
            field_sources: BTreeMap::new(),
            sources: vec![SourceSystem::Directory],
            contributions: Vec::new(),
            quality_score: 1.0,
            quality_flags: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_normalize_dn() {
        assert_eq!(
            normalize_dn("CN=Lab-PC-07, OU=JSmith Lab ,OU=Chemistry,DC=example,DC=edu"),
            "cn=lab-pc-07,ou=jsmith lab,ou=chemistry,dc=example,dc=edu"
        );
    }

    #[test]
    fn test_lab_profile_defaults_domain() {
        let lab = entity(
            EntityType::Lab,
            "jsmith",
            &[("pi_uniqname", json!("JSmith")), ("members", json!([{"uniqname": "akim", "source": "hr"}]))],
        );
        let profile = LabProfile::from_entity(&lab, &ProfileFields::default(), "research", 3);
        assert_eq!(profile.pi, "jsmith");
        assert_eq!(profile.domain, "research");
        assert!(profile.is_member_not_pi("akim"));
        assert!(!profile.is_member_not_pi("jsmith"));
    }

    #[test]
    fn test_token_match_is_delimited() {
        let lab = entity(EntityType::Lab, "jsmith", &[("pi_uniqname", json!("jsmith"))]);
        let profile = LabProfile::from_entity(&lab, &ProfileFields::default(), "research", 3);
        assert!(profile.token_in("jsmith-ws01"));
        assert!(profile.token_in("chem-jsmith02"));
        assert!(!profile.token_in("jsmithson-pc"));
        assert!(!profile.token_in("ajsmith-pc"));
    }

    #[test]
    fn test_short_token_never_matches() {
        let lab = entity(EntityType::Lab, "al", &[("pi_uniqname", json!("al"))]);
        let profile = LabProfile::from_entity(&lab, &ProfileFields::default(), "research", 3);
        assert!(!profile.token_in("al-pc"));
    }

    #[test]
    fn test_owner_not_affiliated_requires_known_owner() {
        let lab = entity(EntityType::Lab, "jsmith", &[("pi_uniqname", json!("jsmith"))]);
        let lab = LabProfile::from_entity(&lab, &ProfileFields::default(), "research", 3);

        let unowned = entity(EntityType::ComputingAsset, "pc-1", &[]);
        let unowned = AssetProfile::from_entity(&unowned, &ProfileFields::default());
        assert!(!unowned.owner_not_affiliated(&lab));

        let stranger = entity(EntityType::ComputingAsset, "pc-2", &[("owner", json!("zzz"))]);
        let stranger = AssetProfile::from_entity(&stranger, &ProfileFields::default());
        assert!(stranger.owner_not_affiliated(&lab));
    }
}
