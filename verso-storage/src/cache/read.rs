//! Materialized cache reads.
//!
//! Values handed out by the cache are shared and read-only: a single record
//! comes back as `Arc<R>`, a sequence as [`RecordSet<R>`]. Changing a record
//! means cloning it out and writing through the store; the next read then
//! probes a new version and derives a new key.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use verso_core::Timestamp;

use super::key::CacheKey;

/// Result of a cache-aside read, carrying where the value came from.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    /// The materialized value.
    value: T,
    /// Key the value was looked up under; `None` when caching was bypassed.
    key: Option<CacheKey>,
    /// When this value was cached (or loaded from the store).
    cached_at: Timestamp,
    /// Whether this was a cache hit or miss.
    was_cache_hit: bool,
    /// Whether a cache failure was absorbed while producing this value.
    degraded: bool,
}

impl<T> CacheRead<T> {
    /// Create a new cache read from a cache hit.
    pub fn from_cache(value: T, key: CacheKey, cached_at: Timestamp) -> Self {
        Self {
            value,
            key: Some(key),
            cached_at,
            was_cache_hit: true,
            degraded: false,
        }
    }

    /// Create a new cache read from a store load (cache miss).
    pub fn from_storage(value: T, key: Option<CacheKey>) -> Self {
        Self {
            value,
            key,
            cached_at: Utc::now(),
            was_cache_hit: false,
            degraded: false,
        }
    }

    /// A value assembled from several lookups, so no single key applies.
    pub(crate) fn composed(value: T, was_cache_hit: bool, cached_at: Timestamp) -> Self {
        Self {
            value,
            key: None,
            cached_at,
            was_cache_hit,
            degraded: false,
        }
    }

    pub(crate) fn with_degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Get a reference to the underlying value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// The key this value was read or written under.
    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    /// Get when this value was cached.
    pub fn cached_at(&self) -> Timestamp {
        self.cached_at
    }

    /// How long ago the value was cached or loaded.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Check if this was a cache hit.
    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    /// Check if this was a cache miss (loaded from the store).
    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    /// True when a cache failure was absorbed under the degrade policy.
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            key: self.key,
            cached_at: self.cached_at,
            was_cache_hit: self.was_cache_hit,
            degraded: self.degraded,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

/// An ordered, shared, read-only sequence of records.
#[derive(Debug)]
pub struct RecordSet<R> {
    records: Arc<[R]>,
}

impl<R> Clone for RecordSet<R> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl<R> RecordSet<R> {
    pub fn new(records: Vec<R>) -> Self {
        Self {
            records: records.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.records.iter()
    }

    pub fn first(&self) -> Option<&R> {
        self.records.first()
    }

    /// Clone the records out for modification.
    pub fn to_vec(&self) -> Vec<R>
    where
        R: Clone,
    {
        self.records.to_vec()
    }

    /// True when both sets share the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.records, &other.records)
    }
}

impl<R> Deref for RecordSet<R> {
    type Target = [R];

    fn deref(&self) -> &[R] {
        &self.records
    }
}

impl<'a, R> IntoIterator for &'a RecordSet<R> {
    type Item = &'a R;
    type IntoIter = std::slice::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl<R> From<Vec<R>> for RecordSet<R> {
    fn from(records: Vec<R>) -> Self {
        Self::new(records)
    }
}
