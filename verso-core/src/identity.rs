//! Identity types for cached records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::error::ValidationError;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 digest used for cache key material.
pub type Digest = [u8; 32];

/// Maximum length in bytes of a record type name.
///
/// Keeps the readable part of a cache key bounded so the full key stays
/// under the 250 byte limit common to memcached-style stores.
pub const MAX_RECORD_TYPE_LEN: usize = 96;

/// Compute SHA-256 hash of content.
pub fn compute_digest(content: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Name of a record type, e.g. `Item`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordType(String);

impl RecordType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that the name is usable inside a cache key.
    ///
    /// Allowed: ASCII alphanumerics plus `_ . : -`, 1..=96 bytes.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let name = self.0.as_str();
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if name.len() > MAX_RECORD_TYPE_LEN {
            Some("must be at most 96 bytes")
        } else if !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b':' | b'-'))
        {
            Some("may only contain ASCII alphanumerics and _ . : -")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ValidationError::InvalidRecordType {
                name: name.to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for RecordType {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Primary key of a record.
///
/// Stores differ in how they key rows, so integer, UUID and text keys are
/// all supported. Ordering is total: all `Int` ids sort before `Uuid` ids,
/// which sort before `Text` ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordId {
    Int(i64),
    Uuid(Uuid),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{}", id),
            Self::Uuid(id) => write!(f, "{}", id),
            Self::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<i32> for RecordId {
    fn from(id: i32) -> Self {
        Self::Int(i64::from(id))
    }
}

impl From<Uuid> for RecordId {
    fn from(id: Uuid) -> Self {
        Self::Uuid(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self::Text(id)
    }
}

/// Name of an eager-loaded association, e.g. `tags`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Association(String);

impl Association {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Association {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Association {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}
