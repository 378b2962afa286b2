//! Field merge rules as data.
//!
//! Each consolidated entity type has a rule set listing its target fields and
//! how each one is produced from the contributing raw records. Adding a new
//! source means adding entries to these tables, never touching the resolver.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::EntityType;
use crate::error::ValidationError;
use crate::source::SourceSystem;

/// A payload field of one source, written `source.field`.
///
/// # Examples
///
/// ```
/// use recondb::merge::SourceField;
/// use recondb::SourceSystem;
///
/// let sf: SourceField = "hr.job_title".parse().unwrap();
/// assert_eq!(sf.source, SourceSystem::Hr);
/// assert_eq!(sf.field, "job_title");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceField {
    pub source: SourceSystem,
    pub field: String,
}

impl SourceField {
    /// Creates a source field reference.
    #[must_use]
    pub fn new(source: SourceSystem, field: impl Into<String>) -> Self {
        Self {
            source,
            field: field.into(),
        }
    }
}

impl fmt::Display for SourceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.source, self.field)
    }
}

impl std::str::FromStr for SourceField {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((source, field)) = s.split_once('.') else {
            return Err(ValidationError::InvalidConfig {
                reason: format!("source field '{s}' must be written as source.field"),
            });
        };
        if field.trim().is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: format!("source field '{s}' has an empty field name"),
            });
        }
        Ok(Self {
            source: source.parse()?,
            field: field.trim().to_string(),
        })
    }
}

impl TryFrom<String> for SourceField {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SourceField> for String {
    fn from(sf: SourceField) -> Self {
        sf.to_string()
    }
}

/// How a target field is produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum MergeStrategy {
    /// First non-null value in source order wins.
    Priority {
        sources: Vec<SourceField>,
    },

    /// All values collected into provenance-tagged objects, deduplicated.
    Union {
        sources: Vec<SourceField>,
        /// Object key used to deduplicate items; scalars are wrapped under it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dedup_key: Option<String>,
    },

    /// Numeric values summed across every contributing record.
    Sum {
        sources: Vec<SourceField>,
    },
}

impl MergeStrategy {
    /// Returns the source fields consulted by this strategy.
    #[must_use]
    pub fn sources(&self) -> &[SourceField] {
        match self {
            Self::Priority { sources } | Self::Union { sources, .. } | Self::Sum { sources } => {
                sources
            }
        }
    }

    /// Short stable name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Priority { .. } => "priority",
            Self::Union { .. } => "union",
            Self::Sum { .. } => "sum",
        }
    }
}

/// Rule for one target field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub target: String,
    #[serde(flatten)]
    pub strategy: MergeStrategy,
}

/// All field rules of one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRuleSet {
    pub entity_type: EntityType,
    pub fields: Vec<FieldRule>,
}

impl MergeRuleSet {
    /// Checks that every rule names a target and at least one source.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for the first bad rule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen = std::collections::HashSet::new();
        for rule in &self.fields {
            if rule.target.trim().is_empty() {
                return Err(ValidationError::InvalidConfig {
                    reason: format!("{} merge rule with empty target", self.entity_type),
                });
            }
            if !seen.insert(rule.target.as_str()) {
                return Err(ValidationError::InvalidConfig {
                    reason: format!("{} merge target '{}' declared twice", self.entity_type, rule.target),
                });
            }
            if rule.strategy.sources().is_empty() {
                return Err(ValidationError::InvalidConfig {
                    reason: format!(
                        "{} {} rule for '{}' lists no sources",
                        self.entity_type,
                        rule.strategy.name(),
                        rule.target
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Merge rule sets for every entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergeRules(Vec<MergeRuleSet>);

impl MergeRules {
    /// Builds a rule table.
    #[must_use]
    pub fn new(sets: Vec<MergeRuleSet>) -> Self {
        Self(sets)
    }

    /// Returns the rule set for `entity_type`, if any.
    #[must_use]
    pub fn for_type(&self, entity_type: EntityType) -> Option<&MergeRuleSet> {
        self.0.iter().find(|s| s.entity_type == entity_type)
    }

    /// Returns the rule sets as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[MergeRuleSet] {
        &self.0
    }

    /// Replaces the rule sets of every entity type present in `overrides`.
    #[must_use]
    pub fn overlay(mut self, overrides: Vec<MergeRuleSet>) -> Self {
        for set in overrides {
            self.0.retain(|s| s.entity_type != set.entity_type);
            self.0.push(set);
        }
        self
    }

    /// Validates every rule set.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.0.iter().try_for_each(MergeRuleSet::validate)
    }
}

fn sf(source: SourceSystem, field: &str) -> SourceField {
    SourceField::new(source, field)
}

fn priority(target: &str, sources: Vec<SourceField>) -> FieldRule {
    FieldRule {
        target: target.to_string(),
        strategy: MergeStrategy::Priority { sources },
    }
}

fn union(target: &str, dedup_key: Option<&str>, sources: Vec<SourceField>) -> FieldRule {
    FieldRule {
        target: target.to_string(),
        strategy: MergeStrategy::Union {
            sources,
            dedup_key: dedup_key.map(String::from),
        },
    }
}

impl Default for MergeRules {
    fn default() -> Self {
        use SourceSystem::{Directory, EndpointManagement, Grants, GroupDirectory, Hr, Ticketing};

        let person = MergeRuleSet {
            entity_type: EntityType::Person,
            fields: vec![
                priority("uniqname", vec![sf(Hr, "uniqname"), sf(Directory, "uniqname"), sf(GroupDirectory, "uniqname"), sf(Ticketing, "uniqname")]),
                priority("display_name", vec![sf(Hr, "name"), sf(Directory, "display_name"), sf(Ticketing, "full_name"), sf(GroupDirectory, "display_name")]),
                priority("email", vec![sf(Directory, "mail"), sf(Hr, "email"), sf(GroupDirectory, "email"), sf(Ticketing, "primary_email")]),
                priority("job_title", vec![sf(Hr, "job_title"), sf(Ticketing, "title"), sf(Directory, "title")]),
                priority("department_id", vec![sf(Hr, "dept_id"), sf(Ticketing, "department_id"), sf(Directory, "department_number")]),
                priority("employee_id", vec![sf(Hr, "employee_id"), sf(Directory, "employee_id")]),
                priority("phone", vec![sf(GroupDirectory, "phone"), sf(Ticketing, "phone"), sf(Directory, "telephone")]),
                union("departments", Some("dept_id"), vec![sf(Hr, "departments"), sf(Hr, "dept_id"), sf(Ticketing, "department_id")]),
                union("groups", None, vec![sf(GroupDirectory, "groups"), sf(Directory, "member_of")]),
            ],
        };

        let department = MergeRuleSet {
            entity_type: EntityType::Department,
            fields: vec![
                priority("name", vec![sf(Hr, "dept_name"), sf(Ticketing, "name"), sf(Directory, "description")]),
                priority("department_code", vec![sf(Hr, "department_code"), sf(Ticketing, "department_code"), sf(Directory, "department_code")]),
                priority("parent_id", vec![sf(Hr, "parent_dept_id"), sf(Ticketing, "parent_id")]),
                priority("college", vec![sf(Hr, "college"), sf(Ticketing, "college")]),
                priority("manager", vec![sf(Hr, "manager_uniqname"), sf(Ticketing, "manager")]),
                priority("ou_dn", vec![sf(Directory, "distinguished_name")]),
            ],
        };

        let asset = MergeRuleSet {
            entity_type: EntityType::ComputingAsset,
            fields: vec![
                priority("name", vec![sf(EndpointManagement, "name"), sf(Directory, "cn"), sf(Ticketing, "name")]),
                priority("serial_number", vec![sf(EndpointManagement, "serial"), sf(Ticketing, "serial_number")]),
                priority("mac_address", vec![sf(EndpointManagement, "mac_address"), sf(Ticketing, "mac_address")]),
                priority("os", vec![sf(EndpointManagement, "os"), sf(Directory, "operating_system"), sf(Ticketing, "os")]),
                priority("owner", vec![sf(Ticketing, "owner_uniqname"), sf(EndpointManagement, "owner"), sf(Directory, "managed_by")]),
                priority("financial_owner", vec![sf(Ticketing, "financial_owner_uniqname"), sf(EndpointManagement, "financial_owner")]),
                priority("last_user", vec![sf(EndpointManagement, "last_user"), sf(Directory, "last_logon_user")]),
                priority("distinguished_name", vec![sf(Directory, "distinguished_name")]),
                priority("function", vec![sf(Ticketing, "function"), sf(EndpointManagement, "function")]),
                priority("last_seen", vec![sf(EndpointManagement, "last_seen"), sf(Directory, "last_logon")]),
                union("groups", None, vec![sf(Directory, "member_of"), sf(GroupDirectory, "groups")]),
            ],
        };

        let lab = MergeRuleSet {
            entity_type: EntityType::Lab,
            fields: vec![
                priority("pi_uniqname", vec![sf(Hr, "pi_uniqname"), sf(Grants, "pi_uniqname"), sf(GroupDirectory, "pi_uniqname"), sf(Directory, "pi_uniqname")]),
                priority("name", vec![sf(GroupDirectory, "lab_name"), sf(Grants, "lab_name"), sf(Directory, "ou_name")]),
                priority("ou_dn", vec![sf(Directory, "ou_dn")]),
                priority("department_id", vec![sf(Hr, "dept_id"), sf(Grants, "dept_id")]),
                priority("domain", vec![sf(GroupDirectory, "lab_type"), sf(Grants, "lab_type")]),
                union("members", Some("uniqname"), vec![sf(GroupDirectory, "members"), sf(Hr, "members"), sf(Grants, "personnel")]),
                union("groups", None, vec![sf(GroupDirectory, "group_name"), sf(Directory, "group_name")]),
                union("grants", Some("grant_id"), vec![sf(Grants, "grant_id")]),
                FieldRule {
                    target: "total_grant_dollars".to_string(),
                    strategy: MergeStrategy::Sum {
                        sources: vec![sf(Grants, "award_amount")],
                    },
                },
            ],
        };

        Self(vec![person, department, asset, lab])
    }
}
