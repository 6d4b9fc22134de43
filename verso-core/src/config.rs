//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Version field read when a record type does not name its own.
pub const DEFAULT_VERSION_FIELD: &str = "updated_at";

/// What the fetcher does when the cache store fails.
///
/// Caching is an optimization, not a correctness dependency, so the default
/// keeps reads working when the cache is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheFailurePolicy {
    /// Treat failed gets and undecodable entries as misses; log failed puts
    /// and return the loaded result.
    #[default]
    Degrade,
    /// Return cache errors to the caller.
    Propagate,
}

impl CacheFailurePolicy {
    pub fn degrades(&self) -> bool {
        matches!(self, Self::Degrade)
    }
}

/// Resolved settings for one record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTypeSettings {
    /// Field holding the record version.
    pub version_field: String,
    /// TTL passed to the cache store on writes.
    pub ttl: Option<Duration>,
    /// When false, reads go straight to the store.
    pub enabled: bool,
}

impl Default for RecordTypeSettings {
    fn default() -> Self {
        Self {
            version_field: DEFAULT_VERSION_FIELD.to_string(),
            ttl: None,
            enabled: true,
        }
    }
}
