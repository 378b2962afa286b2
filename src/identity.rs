//! Natural-key derivation.
//!
//! A natural key is the source-independent business identifier of an entity
//! (normalized username, device name, department id, PI uniqname). Each
//! entity type declares an ordered list of payload fields to try; a source
//! may override the list when it names things differently.

use serde::{Deserialize, Serialize};

use crate::entity::{normalize_key, EntityType};
use crate::error::ValidationError;
use crate::raw::Payload;
use crate::source::SourceSystem;

/// How a candidate field value is turned into a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyTransform {
    /// Normalize the value as-is.
    #[default]
    Plain,
    /// Use the part of an email address before `@`.
    EmailLocalPart,
}

/// One candidate identity field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityField {
    pub field: String,
    #[serde(default)]
    pub transform: KeyTransform,
}

impl IdentityField {
    /// A plain field.
    #[must_use]
    pub fn plain(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            transform: KeyTransform::Plain,
        }
    }

    /// An email field reduced to its local part.
    #[must_use]
    pub fn email_local_part(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            transform: KeyTransform::EmailLocalPart,
        }
    }

    fn extract(&self, payload: &Payload) -> Option<String> {
        let raw = match payload.get(&self.field)? {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let raw = match self.transform {
            KeyTransform::Plain => raw,
            KeyTransform::EmailLocalPart => raw.split('@').next().unwrap_or_default().to_string(),
        };
        let key = normalize_key(&raw);
        (!key.is_empty()).then_some(key)
    }
}

/// Identity rule for one entity type, optionally scoped to one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRule {
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceSystem>,
    pub fields: Vec<IdentityField>,
}

/// The full identity rule table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityRules(Vec<IdentityRule>);

impl IdentityRules {
    /// Builds a rule table.
    #[must_use]
    pub fn new(rules: Vec<IdentityRule>) -> Self {
        Self(rules)
    }

    /// Returns the rules as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[IdentityRule] {
        &self.0
    }

    /// Replaces rules with the same entity type and source scope; adds the
    /// rest.
    #[must_use]
    pub fn overlay(mut self, overrides: Vec<IdentityRule>) -> Self {
        for rule in overrides {
            self.0
                .retain(|r| !(r.entity_type == rule.entity_type && r.source == rule.source));
            self.0.push(rule);
        }
        self
    }

    /// # Errors
    ///
    /// Rejects a rule without candidate fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.0.iter().find(|r| r.fields.is_empty()) {
            Some(rule) => Err(ValidationError::InvalidConfig {
                reason: format!("identity rule for {} lists no fields", rule.entity_type),
            }),
            None => Ok(()),
        }
    }

    fn rule_for(&self, entity_type: EntityType, source: &SourceSystem) -> Option<&IdentityRule> {
        self.0
            .iter()
            .find(|r| r.entity_type == entity_type && r.source.as_ref() == Some(source))
            .or_else(|| {
                self.0
                    .iter()
                    .find(|r| r.entity_type == entity_type && r.source.is_none())
            })
    }

    /// Derives the natural key of a payload.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MissingIdentity` when no candidate field holds
    /// a usable value.
    pub fn natural_key(
        &self,
        entity_type: EntityType,
        source: &SourceSystem,
        payload: &Payload,
    ) -> Result<String, ValidationError> {
        let Some(rule) = self.rule_for(entity_type, source) else {
            return Err(ValidationError::MissingIdentity {
                entity_type,
                fields: Vec::new(),
            });
        };
        rule.fields
            .iter()
            .find_map(|f| f.extract(payload))
            .ok_or_else(|| ValidationError::MissingIdentity {
                entity_type,
                fields: rule.fields.iter().map(|f| f.field.clone()).collect(),
            })
    }
}

impl Default for IdentityRules {
    fn default() -> Self {
        let rule = |entity_type, fields| IdentityRule {
            entity_type,
            source: None,
            fields,
        };
        Self(vec![
            rule(
                EntityType::Person,
                vec![
                    IdentityField::plain("uniqname"),
                    IdentityField::plain("username"),
                    IdentityField::email_local_part("email"),
                ],
            ),
            rule(
                EntityType::Department,
                vec![IdentityField::plain("dept_id"), IdentityField::plain("department_code")],
            ),
            rule(
                EntityType::ComputingAsset,
                vec![
                    IdentityField::plain("name"),
                    IdentityField::plain("computer_name"),
                    IdentityField::plain("hostname"),
                ],
            ),
            rule(
                EntityType::Lab,
                vec![IdentityField::plain("pi_uniqname"), IdentityField::plain("lab_id")],
            ),
            // Directory computer objects are named by their common name.
            IdentityRule {
                entity_type: EntityType::ComputingAsset,
                source: Some(SourceSystem::Directory),
                fields: vec![IdentityField::plain("cn"), IdentityField::plain("name")],
            },
        ])
    }
}
