use std::collections::{BTreeMap, HashSet};

use serde_json::Value as Json;

use crate::consolidated::{scalar_text, ConsolidatedEntity, SourceContribution};
use crate::entity::{normalize_key, ConsolidatedId, EntityType};
use crate::merge::rules::{FieldRule, MergeRuleSet, MergeRules, MergeStrategy, SourceField};
use crate::raw::RawRecord;
use crate::source::SourceSystem;

/// Turns the current raw records of one natural key into a consolidated
/// entity by applying the entity type's merge rules.
///
/// The resolver is pure: the same records and rules always produce the same
/// entity, independent of input order. Quality fields are left at their
/// neutral values for the scorer to fill in.
#[derive(Debug, Clone, Default)]
pub struct FieldMergeResolver {
    rules: MergeRules,
}

impl FieldMergeResolver {
    /// Creates a resolver over the given rule table.
    #[must_use]
    pub fn new(rules: MergeRules) -> Self {
        Self { rules }
    }

    /// Returns the rule table.
    #[must_use]
    pub fn rules(&self) -> &MergeRules {
        &self.rules
    }

    /// Merges `records` (all current rows for `natural_key`) into one entity.
    #[must_use]
    pub fn merge(
        &self,
        entity_type: EntityType,
        natural_key: &str,
        records: &[RawRecord],
    ) -> ConsolidatedEntity {
        let mut ordered: Vec<&RawRecord> = records.iter().collect();
        // Latest first; external id and hash break ties so output never
        // depends on snapshot order.
        ordered.sort_by(|a, b| {
            b.ingested_at
                .cmp(&a.ingested_at)
                .then_with(|| a.external_id.cmp(&b.external_id))
                .then_with(|| a.content_hash.cmp(&b.content_hash))
        });

        let mut fields = BTreeMap::new();
        let mut field_sources = BTreeMap::new();
        if let Some(set) = self.rules.for_type(entity_type) {
            apply_rule_set(set, &ordered, &mut fields, &mut field_sources);
        }

        let mut sources: Vec<SourceSystem> = ordered.iter().map(|r| r.source_system.clone()).collect();
        sources.sort();
        sources.dedup();

        let mut contributions: Vec<SourceContribution> = ordered
            .iter()
            .map(|r| SourceContribution {
                source_system: r.source_system.clone(),
                external_id: r.external_id.clone(),
                raw_record_id: r.id,
                content_hash: r.content_hash.clone(),
            })
            .collect();
        contributions.sort();

        let updated_at = ordered
            .first()
            .map(|r| r.ingested_at)
            .unwrap_or_default();

        ConsolidatedEntity {
            id: ConsolidatedId::derive(entity_type, natural_key),
            entity_type,
            natural_key: natural_key.to_string(),
            fields,
            field_sources,
            sources,
            contributions,
            quality_score: 1.0,
            quality_flags: Vec::new(),
            updated_at,
        }
    }
}

fn apply_rule_set(
    set: &MergeRuleSet,
    records: &[&RawRecord],
    fields: &mut BTreeMap<String, Json>,
    field_sources: &mut BTreeMap<String, SourceSystem>,
) {
    for FieldRule { target, strategy } in &set.fields {
        match strategy {
            MergeStrategy::Priority { sources } => {
                if let Some((value, source)) = first_non_null(sources, records) {
                    fields.insert(target.clone(), value);
                    field_sources.insert(target.clone(), source);
                }
            }
            MergeStrategy::Union { sources, dedup_key } => {
                let items = union_items(sources, dedup_key.as_deref(), records);
                if !items.is_empty() {
                    fields.insert(target.clone(), Json::Array(items));
                }
            }
            MergeStrategy::Sum { sources } => {
                if let Some(total) = sum_numeric(sources, records) {
                    fields.insert(target.clone(), total);
                }
            }
        }
    }
}

fn is_present(value: &Json) -> bool {
    match value {
        Json::Null => false,
        Json::String(s) => !s.trim().is_empty(),
        Json::Array(items) => !items.is_empty(),
        _ => true,
    }
}

fn first_non_null(sources: &[SourceField], records: &[&RawRecord]) -> Option<(Json, SourceSystem)> {
    sources.iter().find_map(|sf| {
        records
            .iter()
            .filter(|r| r.source_system == sf.source)
            .find_map(|r| r.payload.get(&sf.field).filter(|v| is_present(v)))
            .map(|v| (v.clone(), sf.source.clone()))
    })
}

fn dedup_token(item: &serde_json::Map<String, Json>, dedup_key: Option<&str>) -> String {
    let keyed = dedup_key
        .and_then(|k| item.get(k))
        .or_else(|| item.get("value"))
        .and_then(scalar_text);
    match keyed {
        Some(text) => normalize_key(&text),
        None => {
            let mut without_source = item.clone();
            without_source.remove("source");
            Json::Object(without_source).to_string()
        }
    }
}

fn tag_item(value: &Json, source: &SourceSystem, dedup_key: Option<&str>) -> Option<serde_json::Map<String, Json>> {
    let mut map = match value {
        Json::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for k in keys {
                sorted.insert(k.clone(), map[k].clone());
            }
            sorted
        }
        other if is_present(other) => {
            let mut map = serde_json::Map::new();
            map.insert(dedup_key.unwrap_or("value").to_string(), other.clone());
            map
        }
        _ => return None,
    };
    map.insert("source".to_string(), Json::String(source.to_string()));
    Some(map)
}

fn union_items(sources: &[SourceField], dedup_key: Option<&str>, records: &[&RawRecord]) -> Vec<Json> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for sf in sources {
        for record in records.iter().filter(|r| r.source_system == sf.source) {
            let Some(value) = record.payload.get(&sf.field) else {
                continue;
            };
            let mut values: Vec<&Json> = match value {
                Json::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            // Connector array order is not meaningful.
            values.sort_by_cached_key(|v| v.to_string());
            for v in values {
                let Some(item) = tag_item(v, &sf.source, dedup_key) else {
                    continue;
                };
                if seen.insert(dedup_token(&item, dedup_key)) {
                    out.push(Json::Object(item));
                }
            }
        }
    }
    out
}

fn numeric(value: &Json) -> Option<f64> {
    match value {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => {
            let cleaned: String = s.chars().filter(|c| !matches!(c, '$' | ',' | ' ')).collect();
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn sum_numeric(sources: &[SourceField], records: &[&RawRecord]) -> Option<Json> {
    let mut total = 0.0_f64;
    let mut any = false;
    for sf in sources {
        for record in records.iter().filter(|r| r.source_system == sf.source) {
            if let Some(v) = record.payload.get(&sf.field).and_then(numeric) {
                total += v;
                any = true;
            }
        }
    }
    if !any {
        return None;
    }
    let rounded = (total * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 && rounded.abs() < 9.0e15 {
        #[allow(clippy::cast_possible_truncation)]
        return Some(Json::from(rounded as i64));
    }
    serde_json::Number::from_f64(rounded).map(Json::Number)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::merge::rules::MergeRuleSet;
    use crate::raw::{ContentHash, Payload, RawRecordId};

    fn record(source: SourceSystem, external_id: &str, minutes: i64, pairs: &[(&str, Json)]) -> RawRecord {
        let payload: Payload = pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect();
        RawRecord {
            id: RawRecordId::new(),
            entity_type: EntityType::Person,
            source_system: source,
            external_id: external_id.to_string(),
            content_hash: ContentHash::from_digest(&blake3::hash(external_id.as_bytes())),
            payload,
            ingested_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes),
        }
    }

    #[test]
    fn test_priority_first_non_null_wins() {
        let resolver = FieldMergeResolver::default();
        let records = vec![
            record(SourceSystem::Directory, "cn=jsmith", 0, &[("title", json!("Lecturer"))]),
            record(SourceSystem::Ticketing, "t-1", 0, &[("title", json!("Lab Manager"))]),
            record(SourceSystem::Hr, "100", 0, &[("job_title", json!("Research Scientist"))]),
        ];
        let e = resolver.merge(EntityType::Person, "jsmith", &records);
        assert_eq!(e.fields["job_title"], json!("Research Scientist"));
        assert_eq!(e.field_sources["job_title"], SourceSystem::Hr);
    }

    #[test]
    fn test_priority_falls_through_null_and_blank() {
        let resolver = FieldMergeResolver::default();
        let records = vec![
            record(SourceSystem::Hr, "100", 0, &[("job_title", Json::Null)]),
            record(SourceSystem::Ticketing, "t-1", 0, &[("title", json!("  "))]),
            record(SourceSystem::Directory, "cn=jsmith", 0, &[("title", json!("Lecturer"))]),
        ];
        let e = resolver.merge(EntityType::Person, "jsmith", &records);
        assert_eq!(e.fields["job_title"], json!("Lecturer"));
        assert_eq!(e.field_sources["job_title"], SourceSystem::Directory);
    }

    #[test]
    fn test_all_null_field_left_absent() {
        let resolver = FieldMergeResolver::default();
        let records = vec![record(SourceSystem::Hr, "100", 0, &[("name", json!("Jane Smith"))])];
        let e = resolver.merge(EntityType::Person, "jsmith", &records);
        assert!(!e.fields.contains_key("email"));
    }

    #[test]
    fn test_latest_record_within_source_wins() {
        let resolver = FieldMergeResolver::default();
        let records = vec![
            record(SourceSystem::Hr, "100-a", 0, &[("job_title", json!("Postdoc"))]),
            record(SourceSystem::Hr, "100-b", 30, &[("job_title", json!("Assistant Professor"))]),
        ];
        let e = resolver.merge(EntityType::Person, "jsmith", &records);
        assert_eq!(e.fields["job_title"], json!("Assistant Professor"));
        assert_eq!(e.updated_at, records[1].ingested_at);
    }

    #[test]
    fn test_union_dedups_by_key_with_provenance() {
        let resolver = FieldMergeResolver::default();
        let records = vec![
            record(
                SourceSystem::Hr,
                "100",
                0,
                &[
                    ("departments", json!([{"dept_id": "185500", "name": "Chemistry"}, {"dept_id": "171000"}])),
                    ("dept_id", json!(185500)),
                ],
            ),
            record(SourceSystem::Ticketing, "t-1", 0, &[("department_id", json!("190000"))]),
        ];
        let e = resolver.merge(EntityType::Person, "jsmith", &records);
        let items = e.fields["departments"].as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["source"], json!("hr"));
        assert_eq!(items[2], json!({"dept_id": "190000", "source": "ticketing"}));
    }

    #[test]
    fn test_union_independent_of_array_order() {
        let resolver = FieldMergeResolver::default();
        let a = vec![record(SourceSystem::GroupDirectory, "g", 0, &[("groups", json!(["b", "a"]))])];
        let b = vec![record(SourceSystem::GroupDirectory, "g", 0, &[("groups", json!(["a", "b"]))])];
        let ea = resolver.merge(EntityType::Person, "jsmith", &a);
        let eb = resolver.merge(EntityType::Person, "jsmith", &b);
        assert_eq!(ea.fields["groups"], eb.fields["groups"]);
    }

    #[test]
    fn test_sum_across_all_records() {
        let resolver = FieldMergeResolver::default();
        let mut records = vec![
            record(SourceSystem::Grants, "G-1", 0, &[("award_amount", json!(250000))]),
            record(SourceSystem::Grants, "G-2", 5, &[("award_amount", json!("$1,250.50"))]),
            record(SourceSystem::Grants, "G-3", 9, &[("award_amount", json!("n/a"))]),
        ];
        for r in &mut records {
            r.entity_type = EntityType::Lab;
        }
        let e = resolver.merge(EntityType::Lab, "jsmith", &records);
        assert_eq!(e.fields["total_grant_dollars"], json!(251250.5));
    }

    #[test]
    fn test_sum_without_numbers_is_absent() {
        let resolver = FieldMergeResolver::default();
        let records = vec![record(SourceSystem::Grants, "G-1", 0, &[("award_amount", json!("pending"))])];
        let e = resolver.merge(EntityType::Lab, "jsmith", &records);
        assert!(e.field("total_grant_dollars").is_none());
    }

    #[test]
    fn test_merge_is_input_order_independent() {
        let resolver = FieldMergeResolver::default();
        let mut records = vec![
            record(SourceSystem::Directory, "cn=jsmith", 3, &[("mail", json!("jsmith@example.edu"))]),
            record(SourceSystem::Hr, "100", 1, &[("name", json!("Jane Smith"))]),
            record(SourceSystem::GroupDirectory, "m-1", 2, &[("groups", json!(["chem-all"]))]),
        ];
        let first = resolver.merge(EntityType::Person, "jsmith", &records);
        records.reverse();
        let second = resolver.merge(EntityType::Person, "jsmith", &records);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(first.sources.len(), 3);
    }

    #[test]
    fn test_type_without_rules_keeps_lineage_only() {
        let resolver = FieldMergeResolver::new(MergeRules::new(vec![MergeRuleSet {
            entity_type: EntityType::Lab,
            fields: Vec::new(),
        }]));
        let records = vec![record(SourceSystem::Hr, "100", 0, &[("name", json!("x"))])];
        let e = resolver.merge(EntityType::Person, "jsmith", &records);
        assert!(e.fields.is_empty());
        assert_eq!(e.contributions.len(), 1);
    }
}
