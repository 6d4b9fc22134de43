//! Cache layer configuration.
//!
//! Loadable from TOML:
//!
//! ```toml
//! namespace = "shop"
//! default_ttl_secs = 3600
//! on_cache_failure = "degrade"
//!
//! [record_types.Item]
//! version_field = "modified_at"
//!
//! [record_types.AuditLog]
//! enabled = false
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use verso_core::{
    CacheFailurePolicy, ConfigError, RecordType, RecordTypeSettings, DEFAULT_VERSION_FIELD,
};

use super::key::{validate_namespace, DEFAULT_NAMESPACE};

/// Per-record-type overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordTypeConfig {
    /// Version field; falls back to the global default.
    #[serde(default)]
    pub version_field: Option<String>,
    /// Entry TTL; falls back to the global default.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    /// When false, reads bypass the cache.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for RecordTypeConfig {
    fn default() -> Self {
        Self {
            version_field: None,
            ttl_secs: None,
            enabled: true,
        }
    }
}

/// Configuration for the cache-aside layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    /// Prefix of every key this layer writes.
    pub namespace: String,
    /// Version field for record types without an override.
    pub default_version_field: String,
    /// TTL for entries of record types without an override.
    pub default_ttl_secs: Option<u64>,
    /// What to do when the cache store fails.
    pub on_cache_failure: CacheFailurePolicy,
    /// Overrides keyed by record type name.
    pub record_types: BTreeMap<String, RecordTypeConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            default_version_field: DEFAULT_VERSION_FIELD.to_string(),
            default_ttl_secs: None,
            on_cache_failure: CacheFailurePolicy::default(),
            record_types: BTreeMap::new(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the default version field.
    pub fn with_version_field(mut self, field: impl Into<String>) -> Self {
        self.default_version_field = field.into();
        self
    }

    /// Set the default entry TTL.
    ///
    /// TTLs are kept in whole seconds; a fractional TTL rounds up, so any
    /// non-zero duration stays valid.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
        self.default_ttl_secs = Some(secs);
        self
    }

    /// Set the cache failure policy.
    pub fn with_failure_policy(mut self, policy: CacheFailurePolicy) -> Self {
        self.on_cache_failure = policy;
        self
    }

    /// Set overrides for one record type.
    pub fn with_record_type(
        mut self,
        record_type: impl Into<RecordType>,
        config: RecordTypeConfig,
    ) -> Self {
        let record_type: RecordType = record_type.into();
        self.record_types
            .insert(record_type.as_str().to_string(), config);
        self
    }

    /// Resolve the settings for a record type.
    pub fn settings_for(&self, record_type: &RecordType) -> RecordTypeSettings {
        let overrides = self.record_types.get(record_type.as_str());
        let version_field = overrides
            .and_then(|o| o.version_field.clone())
            .unwrap_or_else(|| self.default_version_field.clone());
        let ttl_secs = overrides
            .and_then(|o| o.ttl_secs)
            .or(self.default_ttl_secs);

        RecordTypeSettings {
            version_field,
            ttl: ttl_secs.map(Duration::from_secs),
            enabled: overrides.map(|o| o.enabled).unwrap_or(true),
        }
    }

    /// Check the configuration for values the cache layer cannot use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_namespace(&self.namespace).map_err(|e| ConfigError::InvalidValue {
            field: "namespace".to_string(),
            value: self.namespace.clone(),
            reason: e.to_string(),
        })?;

        if self.default_version_field.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "default_version_field".to_string(),
                value: self.default_version_field.clone(),
                reason: "must not be empty".to_string(),
            });
        }

        if self.default_ttl_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "default_ttl_secs".to_string(),
                value: "0".to_string(),
                reason: "must be positive; omit it for no expiry".to_string(),
            });
        }

        for (name, overrides) in &self.record_types {
            RecordType::new(name.as_str())
                .validate()
                .map_err(|e| ConfigError::InvalidValue {
                    field: "record_types".to_string(),
                    value: name.clone(),
                    reason: e.to_string(),
                })?;

            if let Some(field) = &overrides.version_field {
                if field.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: format!("record_types.{}.version_field", name),
                        value: field.clone(),
                        reason: "must not be empty".to_string(),
                    });
                }
            }

            if overrides.ttl_secs == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: format!("record_types.{}.ttl_secs", name),
                    value: "0".to_string(),
                    reason: "must be positive; omit it for no expiry".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&source)
    }
}
