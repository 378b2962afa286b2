//! Consolidated entities: one authoritative row per natural key per type.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{normalize_key, ConsolidatedId, EntityType};
use crate::raw::{ContentHash, RawRecordId};
use crate::source::SourceSystem;

/// A raw record that fed a consolidated entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceContribution {
    pub source_system: SourceSystem,
    pub external_id: String,
    pub raw_record_id: RawRecordId,
    pub content_hash: ContentHash,
}

/// The merged, scored view of one real-world thing as seen by all sources
/// sharing its natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedEntity {
    pub id: ConsolidatedId,
    pub entity_type: EntityType,
    pub natural_key: String,

    /// Authoritative value per target field. All-null fields are absent.
    pub fields: BTreeMap<String, serde_json::Value>,

    /// Which source won each priority-merged field.
    #[serde(default)]
    pub field_sources: BTreeMap<String, SourceSystem>,

    /// Distinct contributing sources, sorted.
    pub sources: Vec<SourceSystem>,

    #[serde(default)]
    pub contributions: Vec<SourceContribution>,

    pub quality_score: f64,

    #[serde(default)]
    pub quality_flags: Vec<String>,

    /// Latest ingestion time among contributing records.
    pub updated_at: DateTime<Utc>,
}

impl ConsolidatedEntity {
    /// Returns the value of `field`, treating JSON null as absent.
    #[must_use]
    pub fn field(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    /// Returns a scalar field rendered as a string.
    #[must_use]
    pub fn text(&self, field: &str) -> Option<String> {
        self.field(field).and_then(scalar_text)
    }

    /// Returns a scalar field as a normalized identity token.
    #[must_use]
    pub fn token(&self, field: &str) -> Option<String> {
        self.text(field)
            .map(|s| normalize_key(&s))
            .filter(|s| !s.is_empty())
    }

    /// Returns the normalized string items of a list-valued field.
    ///
    /// Plain strings are taken as-is. Provenance-tagged objects produced by a
    /// union merge contribute their `item_key` value, falling back to the
    /// `value`, `uniqname` and `name` keys. A scalar field yields one item.
    #[must_use]
    pub fn tokens(&self, field: &str, item_key: Option<&str>) -> Vec<String> {
        let Some(value) = self.field(field) else {
            return Vec::new();
        };
        let mut out: Vec<String> = match value {
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|item| match item {
                    serde_json::Value::Object(map) => item_key
                        .into_iter()
                        .chain(["value", "uniqname", "name"])
                        .find_map(|k| map.get(k).and_then(scalar_text)),
                    other => scalar_text(other),
                })
                .collect(),
            other => scalar_text(other).into_iter().collect(),
        };
        for item in &mut out {
            *item = normalize_key(item);
        }
        out.retain(|s| !s.is_empty());
        out.sort();
        out.dedup();
        out
    }

    /// Returns true if `flag` was raised by the quality scorer.
    #[must_use]
    pub fn has_flag(&self, flag: &str) -> bool {
        self.quality_flags.iter().any(|f| f == flag)
    }
}

pub(crate) fn scalar_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entity(fields: &[(&str, serde_json::Value)]) -> ConsolidatedEntity {
        ConsolidatedEntity {
            id: ConsolidatedId::derive(EntityType::Lab, "jsmith"),
            entity_type: EntityType::Lab,
            natural_key: "jsmith".to_string(),
            fields: fields.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect(),
            field_sources: BTreeMap::new(),
            sources: vec![SourceSystem::GroupDirectory],
            contributions: Vec::new(),
            quality_score: 1.0,
            quality_flags: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_tokens_from_provenance_objects() {
        let e = entity(&[(
            "members",
            json!([
                {"uniqname": "AKim", "source": "group_directory"},
                {"value": "bchen", "source": "hr"},
                "akim"
            ]),
        )]);
        assert_eq!(e.tokens("members", None), vec!["akim", "bchen"]);
    }

    #[test]
    fn test_tokens_prefers_item_key() {
        let e = entity(&[("groups", json!([{"name": "x", "cn": "jsmith-lab"}]))]);
        assert_eq!(e.tokens("groups", Some("cn")), vec!["jsmith-lab"]);
    }

    #[test]
    fn test_text_ignores_blank_and_null() {
        let e = entity(&[("owner", json!("  ")), ("function", serde_json::Value::Null)]);
        assert_eq!(e.text("owner"), None);
        assert_eq!(e.text("function"), None);
        assert!(e.field("function").is_none());
    }
}
