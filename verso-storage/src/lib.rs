//! VERSO Storage - Version-Keyed Cache-Aside Layer
//!
//! Defines the record store abstraction the cache reads through, the cache
//! layer itself, and an in-memory reference store. Concrete database
//! drivers live with the application; they implement [`RecordStore`].

pub mod cache;
pub mod memory_store;
pub mod record;
pub mod store;

pub use memory_store::{InMemoryRecordStore, StoreCallCounts};
pub use record::{CachedRecord, FieldAccess};
pub use store::{AssociationLoader, NoAssociations, RecordStore, VersionToucher};

// Re-export cache types for application integration
pub use cache::{
    AssociationLoadPolicy, CacheAside, CacheConfig, CacheKey, CacheKeyBuilder, CacheMetrics,
    CacheMetricsSnapshot, CacheRead, CacheStats, CacheStore, CachedQuery, Deferred,
    InMemoryCacheStore, LmdbCacheError, LmdbCacheStore, RecordCache, RecordSet,
    RecordTypeConfig, VersionMetadataProbe,
};

pub use verso_core::{
    Association, CacheError, CacheFailurePolicy, ConfigError, FieldValue, FilterExpr,
    FilterOperator, Predicate, QueryDescriptor, RecordId, RecordType, SortDirection,
    StorageError, ValidationError, Version, VersionMetadata, VersoError, VersoResult,
};
