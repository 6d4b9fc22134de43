//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a persistent,
//! memory-mapped key-value store shared by every process that opens the
//! same directory.
//!
//! # Value Layout
//!
//! ```text
//! [expires_at: i64 LE millis, 0 = never][payload bytes]
//! ```
//!
//! Expired entries are dropped lazily on read, or in bulk with
//! [`LmdbCacheStore::purge_expired`].
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `get` and `stats`
//! - Write transactions for `put`, lazy expiry and purging
//! - Hit and miss counts are tracked with atomic counters

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use verso_core::CacheError;

use super::key::CacheKey;
use super::traits::{CacheStats, CacheStore};

const HEADER_LEN: usize = 8;
const NO_EXPIRY: i64 = 0;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored value is shorter than its header.
    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbCacheError to CacheError.
impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Corrupt(reason) => CacheError::Deserialization { reason },
            other => CacheError::Backend {
                reason: other.to_string(),
            },
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// LMDB-backed cache store.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use verso_storage::cache::{CacheAside, LmdbCacheStore};
///
/// let store = Arc::new(LmdbCacheStore::new("/var/cache/verso", 256)?);
/// let aside = CacheAside::with_defaults(store);
/// ```
pub struct LmdbCacheStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl LmdbCacheStore {
    /// Create a new LMDB cache store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per store and the
        // directory is not opened twice within this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        Ok(Self {
            env,
            db,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    /// Delete every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<u64, LmdbCacheError> {
        let now = Utc::now().timestamp_millis();
        let expired = {
            let rtxn = self.env.read_txn().map_err(txn_error)?;
            let mut keys = Vec::new();
            for result in self.db.iter(&rtxn).map_err(txn_error)? {
                let (key, value) = result.map_err(txn_error)?;
                if matches!(split_value(value), Ok((expires_at, _)) if is_expired(expires_at, now))
                {
                    keys.push(key.to_vec());
                }
            }
            keys
        };

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut deleted = 0u64;
        for key in &expired {
            if self.db.delete(&mut wtxn, key).map_err(txn_error)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;

        self.evictions.fetch_add(deleted, Ordering::Relaxed);
        Ok(deleted)
    }

    fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, LmdbCacheError> {
        let now = Utc::now().timestamp_millis();
        let expired = {
            let rtxn = self.env.read_txn().map_err(txn_error)?;
            match self.db.get(&rtxn, key.as_bytes()).map_err(txn_error)? {
                None => return Ok(None),
                Some(value) => {
                    let (expires_at, payload) = split_value(value)?;
                    if !is_expired(expires_at, now) {
                        return Ok(Some(payload.to_vec()));
                    }
                    true
                }
            }
        };

        if expired {
            let mut wtxn = self.env.write_txn().map_err(txn_error)?;
            if self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_error)? {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
            wtxn.commit().map_err(txn_error)?;
        }
        Ok(None)
    }

    fn write(
        &self,
        key: &CacheKey,
        payload: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), LmdbCacheError> {
        let expires_at = match ttl {
            Some(ttl) => {
                let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
                Utc::now().timestamp_millis().saturating_add(millis.max(1))
            }
            None => NO_EXPIRY,
        };

        let mut full_bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        full_bytes.extend_from_slice(&expires_at.to_le_bytes());
        full_bytes.extend_from_slice(payload);

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &full_bytes)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }
}

fn split_value(value: &[u8]) -> Result<(i64, &[u8]), LmdbCacheError> {
    if value.len() < HEADER_LEN {
        return Err(LmdbCacheError::Corrupt(format!(
            "value of {} bytes is shorter than its header",
            value.len()
        )));
    }
    let (header, payload) = value.split_at(HEADER_LEN);
    let header: [u8; HEADER_LEN] = header
        .try_into()
        .map_err(|_| LmdbCacheError::Corrupt("invalid expiry header".to_string()))?;
    Ok((i64::from_le_bytes(header), payload))
}

fn is_expired(expires_at: i64, now: i64) -> bool {
    expires_at != NO_EXPIRY && expires_at <= now
}

#[async_trait]
impl CacheStore for LmdbCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        match self.read(key) {
            Ok(Some(bytes)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(bytes))
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    async fn put(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.write(key, &value, ttl).map_err(Into::into)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| CacheError::from(txn_error(e)))?;
        let entry_count = self
            .db
            .len(&rtxn)
            .map_err(|e| CacheError::from(txn_error(e)))?;
        let mut memory_bytes = 0u64;
        for result in self
            .db
            .iter(&rtxn)
            .map_err(|e| CacheError::from(txn_error(e)))?
        {
            let (key, value) = result.map_err(|e| CacheError::from(txn_error(e)))?;
            memory_bytes += (key.len() + value.len()) as u64;
        }

        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            memory_bytes,
            evictions: self.evictions.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::CacheKeyBuilder;
    use tempfile::TempDir;
    use verso_core::{QueryDescriptor, RecordId, Version, VersionMetadata};

    fn create_test_store() -> (LmdbCacheStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbCacheStore::new(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    fn key(id: i64, version: i64) -> CacheKey {
        CacheKeyBuilder::default()
            .build(
                &QueryDescriptor::find("Item", id),
                &VersionMetadata::record(Some((RecordId::Int(id), Version::Counter(version)))),
            )
            .expect("key")
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _temp_dir) = create_test_store();
        store
            .put(&key(1, 1), b"payload".to_vec(), None)
            .await
            .expect("put should succeed");

        let cached = store.get(&key(1, 1)).await.expect("get should succeed");
        assert_eq!(cached, Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (store, _temp_dir) = create_test_store();
        let cached = store.get(&key(1, 1)).await.expect("get should succeed");
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_new_version_is_a_new_key() {
        let (store, _temp_dir) = create_test_store();
        store
            .put(&key(1, 1), b"v1".to_vec(), None)
            .await
            .expect("put should succeed");
        assert!(store
            .get(&key(1, 2))
            .await
            .expect("get should succeed")
            .is_none());
    }

    #[tokio::test]
    async fn test_overwrite() {
        let (store, _temp_dir) = create_test_store();
        store
            .put(&key(1, 1), b"first".to_vec(), None)
            .await
            .expect("put should succeed");
        store
            .put(&key(1, 1), b"second".to_vec(), None)
            .await
            .expect("put should succeed");
        assert_eq!(
            store.get(&key(1, 1)).await.expect("get should succeed"),
            Some(b"second".to_vec())
        );
    }

    #[tokio::test]
    async fn test_ttl_expiry_on_read() {
        let (store, _temp_dir) = create_test_store();
        store
            .put(&key(1, 1), b"short".to_vec(), Some(Duration::from_millis(5)))
            .await
            .expect("put should succeed");
        std::thread::sleep(Duration::from_millis(30));

        assert!(store
            .get(&key(1, 1))
            .await
            .expect("get should succeed")
            .is_none());
        let stats = store.stats().await.expect("stats should succeed");
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, _temp_dir) = create_test_store();
        for id in 0..4 {
            store
                .put(&key(id, 1), vec![1], Some(Duration::from_millis(5)))
                .await
                .expect("put should succeed");
        }
        store
            .put(&key(99, 1), vec![2], Some(Duration::from_secs(600)))
            .await
            .expect("put should succeed");
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(store.purge_expired().expect("purge should succeed"), 4);
        assert!(store
            .get(&key(99, 1))
            .await
            .expect("get should succeed")
            .is_some());
    }

    #[tokio::test]
    async fn test_stats() {
        let (store, _temp_dir) = create_test_store();

        // Miss
        let _ = store.get(&key(1, 1)).await;

        store
            .put(&key(1, 1), b"x".to_vec(), None)
            .await
            .expect("put should succeed");

        // Hits
        let _ = store.get(&key(1, 1)).await;
        let _ = store.get(&key(1, 1)).await;

        let stats = store.stats().await.expect("stats should succeed");
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entry_count, 1);
    }

    #[test]
    fn test_corrupt_value_maps_to_deserialization() {
        let err = split_value(&[1, 2, 3]).expect_err("short value");
        assert!(matches!(
            CacheError::from(err),
            CacheError::Deserialization { .. }
        ));
    }
}
