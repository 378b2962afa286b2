//! Raw records: the immutable, append-only lineage of every ingested payload.
//!
//! Connectors hand the engine a flattened key/value payload per upstream
//! object. The payload is opaque here: only the identity rules, merge rules
//! and change detector look inside it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityType;
use crate::error::ValidationError;
use crate::source::SourceSystem;

/// Opaque key/value payload as delivered by a connector.
pub type Payload = BTreeMap<String, serde_json::Value>;

/// Maximum accepted length of an external id.
pub const MAX_EXTERNAL_ID_LEN: usize = 512;

/// Unique identifier of a raw record row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecordId(Uuid);

impl RawRecordId {
    /// Creates a new random raw record id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RawRecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RawRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hex-encoded blake3 digest of a canonicalized payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Wraps a blake3 digest.
    #[must_use]
    pub fn from_digest(digest: &blake3::Hash) -> Self {
        Self(digest.to_hex().to_string())
    }

    /// Returns the hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The key under which "current" raw records are tracked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    /// Entity type of the record.
    pub entity_type: EntityType,
    /// Source the record came from.
    pub source_system: SourceSystem,
    /// Identifier inside that source.
    pub external_id: String,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.entity_type, self.source_system, self.external_id)
    }
}

/// One immutable ingested row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: RawRecordId,
    pub entity_type: EntityType,
    pub source_system: SourceSystem,
    pub external_id: String,
    pub payload: Payload,
    pub ingested_at: DateTime<Utc>,
    pub content_hash: ContentHash,
}

impl RawRecord {
    /// Returns the current-row key for this record.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey {
            entity_type: self.entity_type,
            source_system: self.source_system.clone(),
            external_id: self.external_id.clone(),
        }
    }

    /// Returns the payload value for `field`, treating JSON null as absent.
    #[must_use]
    pub fn field(&self, field: &str) -> Option<&serde_json::Value> {
        self.payload.get(field).filter(|v| !v.is_null())
    }
}

/// An ingestion request as handed over by a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub entity_type: EntityType,
    pub source_system: SourceSystem,
    pub external_id: String,
    pub payload: Payload,
    #[serde(default = "Utc::now")]
    pub ingested_at: DateTime<Utc>,
}

impl IngestRequest {
    /// Creates a request stamped with the current time.
    #[must_use]
    pub fn new(
        entity_type: EntityType,
        source_system: SourceSystem,
        external_id: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            entity_type,
            source_system,
            external_id: external_id.into(),
            payload,
            ingested_at: Utc::now(),
        }
    }

    /// Overrides the ingestion timestamp.
    #[must_use]
    pub fn at(mut self, ingested_at: DateTime<Utc>) -> Self {
        self.ingested_at = ingested_at;
        self
    }

    /// Parses one JSON line as produced by connectors.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MalformedPayload` if the line is not a valid
    /// request object.
    pub fn from_json_line(line: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(line).map_err(|e| ValidationError::MalformedPayload {
            reason: e.to_string(),
        })
    }

    /// Checks the structural invariants of the request.
    ///
    /// Identity-field presence is checked separately by the identity rules.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` describing the first violated rule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let external_id = self.external_id.trim();
        if external_id.is_empty() {
            return Err(ValidationError::EmptyExternalId);
        }
        if external_id.len() > MAX_EXTERNAL_ID_LEN {
            return Err(ValidationError::MalformedPayload {
                reason: format!("external id exceeds {MAX_EXTERNAL_ID_LEN} bytes"),
            });
        }
        if self.payload.values().all(serde_json::Value::is_null) {
            return Err(ValidationError::EmptyPayload {
                entity_type: self.entity_type,
                source_system: self.source_system.to_string(),
            });
        }
        if let Some(key) = self.payload.keys().find(|k| k.trim().is_empty()) {
            return Err(ValidationError::MalformedPayload {
                reason: format!("payload contains a blank key ({key:?})"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload(pairs: &[(&str, serde_json::Value)]) -> Payload {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let req = IngestRequest::new(
            EntityType::Person,
            SourceSystem::Hr,
            "100234",
            payload(&[("uniqname", json!("jsmith"))]),
        );
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_external_id() {
        let req = IngestRequest::new(
            EntityType::Person,
            SourceSystem::Hr,
            "   ",
            payload(&[("uniqname", json!("jsmith"))]),
        );
        assert!(matches!(req.validate(), Err(ValidationError::EmptyExternalId)));
    }

    #[test]
    fn test_validate_rejects_all_null_payload() {
        let req = IngestRequest::new(
            EntityType::Lab,
            SourceSystem::Grants,
            "G-1",
            payload(&[("pi_uniqname", serde_json::Value::Null)]),
        );
        assert!(matches!(req.validate(), Err(ValidationError::EmptyPayload { .. })));
    }

    #[test]
    fn test_validate_rejects_blank_key() {
        let req = IngestRequest::new(
            EntityType::Lab,
            SourceSystem::Grants,
            "G-1",
            payload(&[(" ", json!(1)), ("pi_uniqname", json!("jsmith"))]),
        );
        assert!(matches!(req.validate(), Err(ValidationError::MalformedPayload { .. })));
    }

    #[test]
    fn test_from_json_line() {
        let line = r#"{"entity_type":"computing_asset","source_system":"endpoint_mgmt","external_id":"kc-9","payload":{"name":"LAB-PC-07"},"ingested_at":"2026-01-05T10:00:00Z"}"#;
        let req = IngestRequest::from_json_line(line).unwrap();
        assert_eq!(req.entity_type, EntityType::ComputingAsset);
        assert_eq!(req.source_system, SourceSystem::EndpointManagement);
        assert_eq!(req.payload["name"], json!("LAB-PC-07"));

        assert!(IngestRequest::from_json_line("{not json").is_err());
    }
}
