//! Version-keyed cache-aside layer.
//!
//! Cache keys are derived from what a query asks for plus the current
//! version state of the rows it covers. A committed write that advances a
//! version therefore produces a new key on the next read; nothing is ever
//! invalidated explicitly and old entries are left to expire or be evicted.
//!
//! # Read Path
//!
//! 1. [`VersionMetadataProbe`] reads `(id, version)` or
//!    `(max(version), count)` from the store, never full rows.
//! 2. [`CacheKeyBuilder`] hashes the descriptor and the metadata.
//! 3. The [`CacheStore`] is checked. A hit returns the stored graph.
//! 4. On a miss the records are loaded, associations are attached by the
//!    [`AssociationLoadPolicy`], and the result is written under the key.
//!
//! Reads are returned as deferred handles ([`Deferred`], [`CachedQuery`])
//! and materialize as immutable [`CacheRead`] values.
//!
//! # Staleness Boundaries
//!
//! - Eager-loaded associations are cached with their owner but their
//!   versions are not part of the owner's key. See [`association`].
//! - A version is only as precise as the store keeps it. Two writes within
//!   one tick of a truncated timestamp column are indistinguishable.
//! - Concurrent misses both load and both write; the last write wins.
//!
//! # Example
//!
//! ```ignore
//! let aside = CacheAside::new(Arc::new(InMemoryCacheStore::new()), config)?;
//! let items = aside
//!     .records::<Item, _>(&store)
//!     .with_associations(&tag_loader)
//!     .including(["tags"]);
//!
//! // Nothing runs until the handle is awaited
//! let read = items.find_with_cache(1).await?;
//! if let Some(item) = read {
//!     assert!(item.was_cache_hit() || item.key().is_some());
//! }
//! ```

pub mod association;
pub mod config;
pub mod entry;
pub mod fetcher;
pub mod handle;
pub mod key;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod metrics;
pub mod probe;
pub mod read;
pub mod traits;

pub use association::AssociationLoadPolicy;
pub use config::{CacheConfig, RecordTypeConfig};
pub use entry::CacheEntry;
pub use fetcher::{CacheAside, RecordCache};
pub use handle::{CachedQuery, Deferred};
pub use key::{CacheKey, CacheKeyBuilder};
pub use lmdb_backend::{LmdbCacheError, LmdbCacheStore};
pub use memory_backend::InMemoryCacheStore;
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use probe::VersionMetadataProbe;
pub use read::{CacheRead, RecordSet};
pub use traits::{CacheStats, CacheStore};
