//! Error types for VERSO operations

use thiserror::Error;

use crate::identity::{RecordId, RecordType};

/// Persistent store errors.
///
/// Raised by store implementations and propagated unchanged through the
/// cache layer, so a cached finder fails exactly like its uncached
/// counterpart.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Version probe failed for {record_type}: {reason}")]
    ProbeFailed {
        record_type: RecordType,
        reason: String,
    },

    #[error("Load failed for {record_type}: {reason}")]
    LoadFailed {
        record_type: RecordType,
        reason: String,
    },

    #[error("Version bump failed for {record_type} with id {id}: {reason}")]
    TouchFailed {
        record_type: RecordType,
        id: RecordId,
        reason: String,
    },

    #[error("Version field {field} missing or not a version on {record_type} with id {id}")]
    VersionFieldMissing {
        record_type: RecordType,
        id: RecordId,
        field: String,
    },
}

/// Cache store errors.
///
/// These never indicate incorrect data, only that the cache could not be
/// used. The fetcher's failure policy decides whether they surface.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache entry serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Cache entry deserialization failed: {reason}")]
    Deserialization { reason: String },

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid record type {name:?}: {reason}")]
    InvalidRecordType { name: String, reason: String },

    #[error("Id selection for {record_type} is empty")]
    EmptyIdSet { record_type: RecordType },

    #[error("Unknown association {association} on {record_type}")]
    UnknownAssociation {
        record_type: RecordType,
        association: String,
    },

    #[error("Associations requested on {record_type} but no association loader is configured")]
    AssociationLoaderMissing { record_type: RecordType },

    #[error("Invalid cache namespace {namespace:?}: {reason}")]
    InvalidNamespace { namespace: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Failed to parse config: {reason}")]
    Parse { reason: String },
}

/// Master error type for all VERSO errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VersoError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl VersoError {
    /// True for a failed version probe.
    pub fn is_probe_failure(&self) -> bool {
        matches!(self, Self::Storage(StorageError::ProbeFailed { .. }))
    }

    /// True for a failed record load.
    pub fn is_load_failure(&self) -> bool {
        matches!(self, Self::Storage(StorageError::LoadFailed { .. }))
    }

    /// True when the cache store could not be used.
    pub fn is_cache_unavailable(&self) -> bool {
        matches!(self, Self::Cache(_))
    }
}

/// Result type alias for VERSO operations.
pub type VersoResult<T> = Result<T, VersoError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_probe_failed() {
        let err = StorageError::ProbeFailed {
            record_type: RecordType::new("Item"),
            reason: "connection reset".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Version probe failed"));
        assert!(msg.contains("Item"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_storage_error_display_touch_failed() {
        let err = StorageError::TouchFailed {
            record_type: RecordType::new("Item"),
            id: RecordId::Int(7),
            reason: "read only".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Item"));
        assert!(msg.contains("7"));
    }

    #[test]
    fn test_cache_error_display_unavailable() {
        let err = CacheError::Unavailable {
            reason: "timeout".to_string(),
        };
        assert!(format!("{}", err).contains("timeout"));
    }

    #[test]
    fn test_validation_error_display_unknown_association() {
        let err = ValidationError::UnknownAssociation {
            record_type: RecordType::new("Item"),
            association: "owners".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("owners"));
        assert!(msg.contains("Item"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "namespace".to_string(),
            value: "".to_string(),
            reason: "must not be empty".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("namespace"));
        assert!(msg.contains("must not be empty"));
    }

    #[test]
    fn test_verso_error_from_conversions() {
        let err: VersoError = StorageError::LoadFailed {
            record_type: RecordType::new("Item"),
            reason: "gone".to_string(),
        }
        .into();
        assert!(err.is_load_failure());
        assert!(!err.is_probe_failure());

        let err: VersoError = CacheError::LockPoisoned.into();
        assert!(err.is_cache_unavailable());

        let err: VersoError = StorageError::ProbeFailed {
            record_type: RecordType::new("Item"),
            reason: "gone".to_string(),
        }
        .into();
        assert!(err.is_probe_failure());
    }
}
