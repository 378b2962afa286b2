//! Reconciler configuration.
//!
//! Every section defaults to the built-in tables. A TOML file only needs to
//! name what it changes: rule sets are replaced per entity type, identity
//! rules per (entity type, source) scope.
//!
//! ```toml
//! workers = 8
//!
//! [change]
//! volatile_fields = ["last_sync", "polled_at"]
//!
//! [[merge]]
//! entity_type = "person"
//! fields = [
//!   { target = "email", strategy = "priority", sources = ["directory.mail", "hr.email"] },
//! ]
//!
//! [discovery.base_confidence]
//! name_pattern = 0.72
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::change::ChangeDetectorConfig;
use crate::error::ValidationError;
use crate::identity::{IdentityRule, IdentityRules};
use crate::master::{MasterMatchRule, MasterSettings};
use crate::merge::{MergeRuleSet, MergeRules};
use crate::quality::{QualityRuleSet, QualityRules, QualityScorer};
use crate::relationship::DiscoverySettings;

#[cfg(feature = "persistent")]
use crate::storage::persistent::PersistentConfig;

/// Full reconciler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconConfig {
    /// Worker threads per pass.
    pub workers: usize,
    /// Bounded queue depth per worker.
    pub queue_capacity: usize,
    pub change: ChangeDetectorConfig,
    pub identity: IdentityRules,
    pub merge: MergeRules,
    pub quality: QualityRules,
    pub discovery: DiscoverySettings,
    pub master: MasterSettings,
    #[cfg(feature = "persistent")]
    pub persistent: PersistentConfig,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            change: ChangeDetectorConfig::default(),
            identity: IdentityRules::default(),
            merge: MergeRules::default(),
            quality: QualityRules::default(),
            discovery: DiscoverySettings::default(),
            master: MasterSettings::default(),
            #[cfg(feature = "persistent")]
            persistent: PersistentConfig::default(),
        }
    }
}

/// Shape of the TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    change: Option<ChangeDetectorConfig>,
    identity: Vec<IdentityRule>,
    merge: Vec<MergeRuleSet>,
    quality: Vec<QualityRuleSet>,
    discovery: Option<DiscoverySettings>,
    master: Option<MasterFile>,
    #[cfg(feature = "persistent")]
    persistent: Option<PersistentConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MasterFile {
    contribution_weight: Option<f64>,
    match_rules: Vec<MasterMatchRule>,
}

impl ReconConfig {
    /// Parses a TOML document on top of the defaults and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] for unparseable TOML or any
    /// failed check in [`ReconConfig::validate`].
    pub fn from_toml_str(raw: &str) -> Result<Self, ValidationError> {
        let file: ConfigFile = toml::from_str(raw).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("failed to parse config: {e}"),
        })?;
        let config = Self::default().apply(file);
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or does not hold a valid config.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::from_toml_str(&raw)
    }

    fn apply(mut self, file: ConfigFile) -> Self {
        if let Some(workers) = file.workers {
            self.workers = workers;
        }
        if let Some(capacity) = file.queue_capacity {
            self.queue_capacity = capacity;
        }
        if let Some(change) = file.change {
            self.change = change;
        }
        self.identity = self.identity.overlay(file.identity);
        self.merge = self.merge.overlay(file.merge);
        self.quality = self.quality.overlay(file.quality);
        if let Some(discovery) = file.discovery {
            self.discovery = discovery;
        }
        if let Some(master) = file.master {
            if let Some(weight) = master.contribution_weight {
                self.master.contribution_weight = weight;
            }
            self.master = self.master.overlay(master.match_rules);
        }
        #[cfg(feature = "persistent")]
        if let Some(persistent) = file.persistent {
            self.persistent = persistent;
        }
        self
    }

    /// Checks every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.workers == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "workers must be at least 1".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "queue_capacity must be at least 1".to_string(),
            });
        }
        self.identity.validate()?;
        self.merge.validate()?;
        QualityScorer::new(&self.quality)?;
        self.discovery.validate()?;
        self.master.validate()
    }
}
