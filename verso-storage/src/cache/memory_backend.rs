//! In-process cache store.
//!
//! TTL-aware, optionally bounded. When full, the oldest entry is evicted.
//! [`InMemoryCacheStore::shared`] returns one store per process, for
//! applications that want a default cache without wiring one up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use verso_core::CacheError;

use super::key::CacheKey;
use super::traits::{CacheStats, CacheStore};

static SHARED: Lazy<Arc<InMemoryCacheStore>> = Lazy::new(|| Arc::new(InMemoryCacheStore::new()));

#[derive(Debug)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
    sequence: u64,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Cache store kept in a `HashMap` behind a lock.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<CacheKey, StoredValue>>,
    max_entries: Option<usize>,
    sequence: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl InMemoryCacheStore {
    /// Create an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding at most `max_entries` entries.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries.max(1)),
            ..Self::default()
        }
    }

    /// The process-wide shared store.
    pub fn shared() -> Arc<InMemoryCacheStore> {
        Arc::clone(&SHARED)
    }

    /// Number of live entries (expired entries not yet purged included).
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<u64, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        let before = entries.len();
        entries.retain(|_, value| !value.is_expired(now));
        let removed = (before - entries.len()) as u64;
        self.evictions.fetch_add(removed, Ordering::Relaxed);
        Ok(removed)
    }

    fn evict_oldest(&self, entries: &mut HashMap<CacheKey, StoredValue>) {
        let oldest = entries
            .iter()
            .min_by_key(|(_, value)| value.sequence)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        let found = {
            let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
            match entries.get(key) {
                Some(value) if !value.is_expired(now) => Some(value.bytes.clone()),
                Some(_) => None,
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                }
            }
        };

        match found {
            Some(bytes) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(bytes))
            }
            None => {
                // Expired: drop it so it stops counting against capacity.
                let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
                if entries.get(key).is_some_and(|v| v.is_expired(now)) {
                    entries.remove(key);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn put(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let stored = StoredValue {
            bytes: value,
            expires_at: ttl.map(|ttl| now + ttl),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };

        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        if let Some(max) = self.max_entries {
            if !entries.contains_key(key) && entries.len() >= max {
                let before = entries.len();
                entries.retain(|_, value| !value.is_expired(now));
                self.evictions
                    .fetch_add((before - entries.len()) as u64, Ordering::Relaxed);
                if entries.len() >= max {
                    self.evict_oldest(&mut entries);
                }
            }
        }
        entries.insert(key.clone(), stored);
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: entries.len() as u64,
            memory_bytes: entries
                .iter()
                .map(|(key, value)| (key.len() + value.bytes.len()) as u64)
                .sum(),
            evictions: self.evictions.load(Ordering::Relaxed),
        })
    }
}
