//! Content-hash change detection.
//!
//! An incoming payload is reduced to a canonical form that ignores key
//! order, array order, null values and volatile audit-only fields, then
//! hashed with blake3. A record whose hash equals the hash of the current
//! row for the same `(entity_type, source_system, external_id)` carries no
//! new information and is short-circuited.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::raw::{ContentHash, Payload, RawRecord};

/// Domain separator mixed into every content hash.
const HASH_CONTEXT: &[u8] = b"recondb.payload.v1\0";

/// Change-detector settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeDetectorConfig {
    /// Top-level payload keys excluded from the hash.
    pub volatile_fields: BTreeSet<String>,
    /// Top-level array fields whose element order is meaningful.
    ///
    /// Every other array is sorted before hashing.
    pub ordered_fields: BTreeSet<String>,
}

impl Default for ChangeDetectorConfig {
    fn default() -> Self {
        Self {
            volatile_fields: [
                "last_sync",
                "synced_at",
                "last_synced_at",
                "fetched_at",
                "_ingested_at",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            ordered_fields: BTreeSet::new(),
        }
    }
}

/// Outcome of comparing a payload against the current row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChangeStatus {
    /// New information: first record for the key, or a different hash.
    Changed {
        /// Hash of the row being superseded, if any.
        previous: Option<ContentHash>,
    },
    /// Same significant content as the current row.
    Unchanged,
}

impl ChangeStatus {
    /// Returns true when downstream work is needed.
    #[must_use]
    pub const fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Pure, deterministic payload hasher and comparator.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    config: ChangeDetectorConfig,
}

impl ChangeDetector {
    /// Creates a detector.
    #[must_use]
    pub fn new(config: ChangeDetectorConfig) -> Self {
        Self { config }
    }

    /// Returns the canonical form of the significant part of `payload`.
    #[must_use]
    pub fn canonicalize(&self, payload: &Payload) -> Json {
        let mut out = serde_json::Map::new();
        for (key, value) in payload {
            if value.is_null() || self.config.volatile_fields.contains(key) {
                continue;
            }
            let ordered = self.config.ordered_fields.contains(key);
            out.insert(key.clone(), canonical_value(value, ordered));
        }
        Json::Object(out)
    }

    /// Hashes the canonical form of `payload`.
    #[must_use]
    pub fn content_hash(&self, payload: &Payload) -> ContentHash {
        let canonical = self.canonicalize(payload);
        let mut hasher = blake3::Hasher::new();
        hasher.update(HASH_CONTEXT);
        hasher.update(canonical_bytes(&canonical).as_bytes());
        ContentHash::from_digest(&hasher.finalize())
    }

    /// Compares a freshly computed hash against the current row, if any.
    #[must_use]
    pub fn detect(&self, hash: &ContentHash, current: Option<&RawRecord>) -> ChangeStatus {
        detect(hash, current)
    }
}

/// Change gate used by raw stores under their write lock.
#[must_use]
pub fn detect(hash: &ContentHash, current: Option<&RawRecord>) -> ChangeStatus {
    match current {
        Some(prior) if prior.content_hash == *hash => ChangeStatus::Unchanged,
        Some(prior) => ChangeStatus::Changed {
            previous: Some(prior.content_hash.clone()),
        },
        None => ChangeStatus::Changed { previous: None },
    }
}

fn canonical_value(value: &Json, keep_order: bool) -> Json {
    match value {
        Json::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for key in keys {
                let v = &map[key];
                if !v.is_null() {
                    out.insert(key.clone(), canonical_value(v, false));
                }
            }
            Json::Object(out)
        }
        Json::Array(items) => {
            let mut items: Vec<Json> = items.iter().map(|v| canonical_value(v, false)).collect();
            if !keep_order {
                items.sort_by_cached_key(canonical_bytes);
            }
            Json::Array(items)
        }
        other => other.clone(),
    }
}

fn canonical_bytes(value: &Json) -> String {
    // Maps are rebuilt with sorted insertion, so the serialization is stable
    // whether or not serde_json preserves insertion order.
    value.to_string()
}
