//! Cache store trait.
//!
//! This module defines the trait that must be implemented by cache stores.
//! The cache layer only ever reads and writes opaque bytes under keys it
//! derived itself; it never deletes.

use std::time::Duration;

use async_trait::async_trait;
use verso_core::CacheError;

use super::key::CacheKey;

/// Key-value cache store for pluggable cache implementations.
///
/// This trait abstracts over different cache stores (e.g., LMDB, Redis,
/// memcached, in-memory). Implementations should be thread-safe and support
/// concurrent access.
///
/// # Eviction
///
/// Entries orphaned by a version change are never read again. Stores are
/// expected to reclaim them through TTLs or their own eviction policy.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get the bytes stored under a key, or None if absent or expired.
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store bytes under a key, replacing any previous value.
    ///
    /// `ttl` is a hint; stores without expiry support may ignore it.
    async fn put(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Get cache statistics.
    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate memory usage in bytes.
    pub memory_bytes: u64,
    /// Number of evictions due to capacity or expiry.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
