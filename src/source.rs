//! Systems of record.
//!
//! Every raw record names the system it was pulled from. Merge priority
//! tables refer to sources by their stable snake_case name, so new feeds can
//! be added through configuration as [`SourceSystem::Other`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// An upstream system of record.
///
/// # Examples
///
/// ```
/// use recondb::SourceSystem;
///
/// let hr: SourceSystem = "hr".parse().unwrap();
/// assert_eq!(hr, SourceSystem::Hr);
/// assert_eq!("keyclient".parse::<SourceSystem>().unwrap().to_string(), "keyclient");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SourceSystem {
    /// Directory service (accounts, computers, OUs).
    Directory,
    /// Ticketing / CMDB system.
    Ticketing,
    /// HR feed.
    Hr,
    /// Grants feed.
    Grants,
    /// Endpoint-management feed.
    EndpointManagement,
    /// Group and membership directory.
    GroupDirectory,
    /// Any other named feed.
    Other(String),
}

impl SourceSystem {
    /// Stable snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Directory => "directory",
            Self::Ticketing => "ticketing",
            Self::Hr => "hr",
            Self::Grants => "grants",
            Self::EndpointManagement => "endpoint_mgmt",
            Self::GroupDirectory => "group_directory",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceSystem {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Ok(match name.as_str() {
            "" => return Err(ValidationError::EmptySourceSystem),
            "directory" => Self::Directory,
            "ticketing" => Self::Ticketing,
            "hr" => Self::Hr,
            "grants" => Self::Grants,
            "endpoint_mgmt" => Self::EndpointManagement,
            "group_directory" => Self::GroupDirectory,
            _ => Self::Other(name),
        })
    }
}

impl TryFrom<String> for SourceSystem {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SourceSystem> for String {
    fn from(source: SourceSystem) -> Self {
        source.as_str().to_string()
    }
}
