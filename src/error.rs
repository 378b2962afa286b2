//! Error types for recondb.
//!
//! Errors are strongly typed using thiserror. Ingestion problems are
//! rejected at the boundary as [`ValidationError`]; problems while running a
//! reconciliation pass surface as [`ExecutionError`]. Merge ambiguity is never
//! an error: it is resolved by priority or recorded as a quality flag.

use thiserror::Error;

use crate::entity::EntityType;
use crate::storage::StorageError;

/// Validation errors raised at the ingestion boundary or while loading config.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("External id cannot be empty")]
    EmptyExternalId,

    #[error("Payload for {entity_type} from '{source_system}' is empty")]
    EmptyPayload {
        entity_type: EntityType,
        source_system: String,
    },

    #[error("Malformed payload: {reason}")]
    MalformedPayload {
        reason: String,
    },

    #[error("No identity field found for {entity_type} (tried: {})", .fields.join(", "))]
    MissingIdentity {
        entity_type: EntityType,
        fields: Vec<String>,
    },

    #[error("Unknown entity type '{name}'")]
    UnknownEntityType {
        name: String,
    },

    #[error("Source system name cannot be empty")]
    EmptySourceSystem,

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        pattern: String,
        reason: String,
    },
}

/// Errors that occur while executing a reconciliation pass.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Storage error: {message}")]
    Storage {
        message: String,
    },

    #[error("Worker pool '{pool}' disconnected before the pass completed")]
    Disconnected {
        pool: String,
    },

    #[error("Worker '{worker}' panicked during the pass")]
    WorkerPanicked {
        worker: String,
    },

    #[error("Failed to spawn worker '{worker}': {reason}")]
    SpawnFailed {
        worker: String,
        reason: String,
    },

    #[error("Journal error: {message}")]
    Journal {
        message: String,
    },
}

impl From<StorageError> for ExecutionError {
    fn from(err: StorageError) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }
}

/// Top-level error type for recondb.
#[derive(Debug, Error)]
pub enum ReconError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl From<StorageError> for ReconError {
    fn from(err: StorageError) -> Self {
        Self::Execution(err.into())
    }
}

impl ReconError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if rerunning the pass may succeed.
    ///
    /// Every pass is a deterministic function of the durable raw snapshot, so
    /// execution failures are retried by rerunning the whole pass.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => !matches!(e, ExecutionError::Journal { .. }),
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for recondb operations.
pub type ReconResult<T> = Result<T, ReconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_identity_lists_fields() {
        let err = ValidationError::MissingIdentity {
            entity_type: EntityType::Person,
            fields: vec!["uniqname".to_string(), "email".to_string()],
        };
        let msg = format!("{err}");
        assert!(msg.contains("person"));
        assert!(msg.contains("uniqname, email"));
    }

    #[test]
    fn test_empty_payload_message() {
        let err = ValidationError::EmptyPayload {
            entity_type: EntityType::ComputingAsset,
            source_system: "endpoint_mgmt".to_string(),
        };
        assert!(err.to_string().contains("endpoint_mgmt"));
    }

    #[test]
    fn test_recon_error_from_validation() {
        let err: ReconError = ValidationError::EmptyExternalId.into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_storage_error_is_retryable_execution() {
        let err: ReconError = StorageError::BackendError("poisoned lock".to_string()).into();
        assert!(err.is_execution());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("poisoned lock"));
    }

    #[test]
    fn test_journal_error_not_retryable() {
        let err: ReconError = ExecutionError::Journal {
            message: "crc mismatch".to_string(),
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_internal_error() {
        let err = ReconError::internal("unexpected state");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("unexpected state"));
    }
}
