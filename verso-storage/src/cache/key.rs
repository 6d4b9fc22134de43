//! Version-keyed cache key derivation.
//!
//! A key is a pure function of (record type, query descriptor, version
//! metadata). Any committed write that changes what the probe sees changes
//! the metadata, and therefore the key: old entries are simply never asked
//! for again.
//!
//! # Format
//!
//! ```text
//! {namespace}:{record_type}:{kind}:{sha256 hex}
//! ```
//!
//! `kind` is `one`, `ids` or `set`. The digest covers the key format
//! version, the record type, the canonical descriptor (selection, filters,
//! order, limit, offset, eager-load set) and the metadata, serialized with
//! `serde_json`. The readable prefix is for operators; only the digest
//! carries identity.

use std::fmt;

use serde::Serialize;
use verso_core::{
    compute_digest, CacheError, QueryDescriptor, RecordType, ValidationError, VersionMetadata,
    VersoResult,
};

/// Bumped whenever the digest material changes shape, so entries written by
/// an older layout are never read back.
const KEY_FORMAT_VERSION: u32 = 2;

/// Maximum namespace length in bytes.
pub const MAX_NAMESPACE_LEN: usize = 64;

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "verso";

/// A derived cache key.
///
/// Only [`CacheKeyBuilder`] constructs keys, so every key in circulation
/// carries a digest of its query and metadata.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    inner: String,
}

impl CacheKey {
    /// Maximum encoded length in bytes (memcached-safe).
    pub const MAX_LEN: usize = 250;

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.inner.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The hex digest segment.
    pub fn digest_hex(&self) -> &str {
        self.inner
            .rsplit_once(':')
            .map(|(_, digest)| digest)
            .unwrap_or_default()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    format: u32,
    record_type: &'a RecordType,
    descriptor: &'a QueryDescriptor,
    metadata: &'a VersionMetadata,
}

/// Builds cache keys within one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyBuilder {
    namespace: String,
}

impl Default for CacheKeyBuilder {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl CacheKeyBuilder {
    /// Create a builder for a namespace.
    ///
    /// The namespace must be 1..=64 bytes of ASCII alphanumerics, `_`, `.`
    /// or `-`.
    pub fn new(namespace: impl Into<String>) -> Result<Self, ValidationError> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;
        Ok(Self { namespace })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Derive the key for a descriptor under the given metadata.
    ///
    /// Pure and deterministic. Fails only for an invalid descriptor or if
    /// the key material cannot be serialized.
    pub fn build(
        &self,
        descriptor: &QueryDescriptor,
        metadata: &VersionMetadata,
    ) -> VersoResult<CacheKey> {
        descriptor.validate()?;

        let material = KeyMaterial {
            format: KEY_FORMAT_VERSION,
            record_type: descriptor.record_type(),
            descriptor,
            metadata,
        };
        let bytes = serde_json::to_vec(&material).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        let digest = hex::encode(compute_digest(&bytes));

        Ok(CacheKey {
            inner: format!(
                "{}:{}:{}:{}",
                self.namespace,
                descriptor.record_type(),
                descriptor.kind(),
                digest
            ),
        })
    }
}

pub(crate) fn validate_namespace(namespace: &str) -> Result<(), ValidationError> {
    let reason = if namespace.is_empty() {
        Some("must not be empty")
    } else if namespace.len() > MAX_NAMESPACE_LEN {
        Some("must be at most 64 bytes")
    } else if !namespace
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
    {
        Some("may only contain ASCII alphanumerics and _ . -")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ValidationError::InvalidNamespace {
            namespace: namespace.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
