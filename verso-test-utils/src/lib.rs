//! VERSO Test Utilities
//!
//! Shared test infrastructure for the VERSO workspace:
//! - Fixture record types with field access and an association loader
//! - A cache store that fails or corrupts entries on demand
//! - Proptest generators for identities, versions and predicates
//! - Custom assertions for cache reads and error variants

pub use verso_core::{
    AggregateProbe, Association, CacheError, CacheFailurePolicy, ConfigError, FieldValue, FilterExpr, Predicate,
    QueryDescriptor, RecordId, RecordType, SortDirection, StorageError, Timestamp,
    ValidationError, Version, VersionChecksum, VersionMetadata, VersoError, VersoResult,
};
pub use verso_storage::{
    AssociationLoader, CacheAside, CacheConfig, CacheKey, CacheRead, CacheStats, CacheStore,
    CachedRecord, FieldAccess, InMemoryCacheStore, InMemoryRecordStore, RecordTypeConfig,
};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// FIXTURE RECORDS
// ============================================================================

/// A tag attached to an [`Item`] through the `tags` association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub label: String,
}

impl Tag {
    pub fn new(id: i64, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }
}

/// Catalog item versioned by its `modified_at` timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub price_cents: i64,
    pub modified_at: Timestamp,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl CachedRecord for Item {
    fn record_type() -> RecordType {
        RecordType::new("Item")
    }

    fn record_id(&self) -> RecordId {
        RecordId::Int(self.id)
    }

    fn associations() -> &'static [&'static str] {
        &["tags"]
    }
}

impl FieldAccess for Item {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(FieldValue::Int(self.id)),
            "name" => Some(FieldValue::Text(self.name.clone())),
            "category" => Some(FieldValue::Text(self.category.clone())),
            "price_cents" => Some(FieldValue::Int(self.price_cents)),
            "modified_at" => Some(FieldValue::Timestamp(self.modified_at)),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> bool {
        match (name, value) {
            ("name", FieldValue::Text(v)) => self.name = v,
            ("category", FieldValue::Text(v)) => self.category = v,
            ("price_cents", FieldValue::Int(v)) => self.price_cents = v,
            ("modified_at", FieldValue::Timestamp(v)) => self.modified_at = v,
            _ => return false,
        }
        true
    }
}

/// Document keyed by text id and versioned by a `revision` counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub slug: String,
    pub title: String,
    pub revision: i64,
}

impl CachedRecord for Document {
    fn record_type() -> RecordType {
        RecordType::new("Document")
    }

    fn record_id(&self) -> RecordId {
        RecordId::Text(self.slug.clone())
    }
}

impl FieldAccess for Document {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "slug" => Some(FieldValue::Text(self.slug.clone())),
            "title" => Some(FieldValue::Text(self.title.clone())),
            "revision" => Some(FieldValue::Int(self.revision)),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> bool {
        match (name, value) {
            ("title", FieldValue::Text(v)) => self.title = v,
            ("revision", FieldValue::Int(v)) => self.revision = v,
            _ => return false,
        }
        true
    }
}

// ============================================================================
// ASSOCIATION LOADER
// ============================================================================

/// Attaches tags to items from an in-memory table.
///
/// Tag updates here do not touch the owning item's version.
#[derive(Debug, Default)]
pub struct TagLoader {
    tags: RwLock<BTreeMap<i64, Vec<Tag>>>,
    calls: AtomicU64,
}

impl TagLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tags of one item.
    pub async fn set_tags(&self, item_id: i64, tags: Vec<Tag>) {
        self.tags.write().await.insert(item_id, tags);
    }

    /// Number of `attach` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssociationLoader<Item> for TagLoader {
    async fn attach(
        &self,
        records: &mut [Item],
        includes: &BTreeSet<Association>,
    ) -> VersoResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !includes.contains(&Association::new("tags")) {
            return Ok(());
        }

        let tags = self.tags.read().await;
        for item in records.iter_mut() {
            item.tags = tags.get(&item.id).cloned().unwrap_or_default();
        }
        Ok(())
    }
}

// ============================================================================
// FAULT-INJECTING CACHE STORE
// ============================================================================

/// In-memory cache store that fails or corrupts on demand.
#[derive(Debug, Default)]
pub struct FlakyCacheStore {
    inner: InMemoryCacheStore,
    fail_gets: AtomicBool,
    fail_puts: AtomicBool,
    corrupt_reads: AtomicBool,
    gets: AtomicU64,
    puts: AtomicU64,
}

impl FlakyCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Return undecodable bytes for every stored entry.
    pub fn corrupt_reads(&self, corrupt: bool) {
        self.corrupt_reads.store(corrupt, Ordering::SeqCst);
    }

    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    /// Entries actually stored.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl CacheStore for FlakyCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable {
                reason: "get failure injected".to_string(),
            });
        }

        let found = self.inner.get(key).await?;
        if found.is_some() && self.corrupt_reads.load(Ordering::SeqCst) {
            return Ok(Some(b"\x00not a cache entry".to_vec()));
        }
        Ok(found)
    }

    async fn put(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable {
                reason: "put failure injected".to_string(),
            });
        }
        self.inner.put(key, value, ttl).await
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.inner.stats().await
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records, stores and configurations.

    use super::*;

    /// Fixed reference instant: 2024-01-01T00:00:00Z.
    pub fn base_time() -> Timestamp {
        DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap_or_default()
    }

    /// `base_time()` plus `secs` seconds.
    pub fn at(secs: i64) -> Timestamp {
        base_time() + chrono::Duration::seconds(secs)
    }

    pub fn item(id: i64, name: &str, category: &str, price_cents: i64, modified_at: Timestamp) -> Item {
        Item {
            id,
            name: name.to_string(),
            category: category.to_string(),
            price_cents,
            modified_at,
            tags: Vec::new(),
        }
    }

    /// Five items: three tools and two garden items.
    pub fn catalog() -> Vec<Item> {
        vec![
            item(1, "hammer", "tools", 1500, at(1)),
            item(2, "wrench", "tools", 1200, at(2)),
            item(3, "saw", "tools", 2500, at(5)),
            item(4, "rake", "garden", 1800, at(3)),
            item(5, "hose", "garden", 3000, at(4)),
        ]
    }

    pub fn item_store() -> InMemoryRecordStore<Item> {
        InMemoryRecordStore::with_records(catalog())
    }

    pub fn document(slug: &str, title: &str, revision: i64) -> Document {
        Document {
            slug: slug.to_string(),
            title: title.to_string(),
            revision,
        }
    }

    pub fn document_store() -> InMemoryRecordStore<Document> {
        InMemoryRecordStore::with_records(vec![
            document("intro", "Introduction", 1),
            document("setup", "Setup", 4),
        ])
    }

    /// Items versioned by `modified_at`, documents by `revision`.
    pub fn test_config() -> CacheConfig {
        CacheConfig::new()
            .with_namespace("test")
            .with_record_type(
                "Item",
                RecordTypeConfig {
                    version_field: Some("modified_at".to_string()),
                    ..RecordTypeConfig::default()
                },
            )
            .with_record_type(
                "Document",
                RecordTypeConfig {
                    version_field: Some("revision".to_string()),
                    ..RecordTypeConfig::default()
                },
            )
    }

    /// A cache-aside layer over `cache` using [`test_config`].
    pub fn cache_aside<C: CacheStore>(cache: Arc<C>) -> Result<CacheAside<C>, ConfigError> {
        CacheAside::new(cache, test_config())
    }

    /// Bump an item's `modified_at` the way an application write would.
    pub async fn touch_item(store: &InMemoryRecordStore<Item>, id: i64, modified_at: Timestamp) -> bool {
        store
            .update(&RecordId::Int(id), |item| item.modified_at = modified_at)
            .await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for VERSO types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Timestamps between 1970 and roughly 2096, microsecond precision.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (0i64..4_000_000_000, 0u32..1_000_000).prop_map(|(secs, micros)| {
            DateTime::<Utc>::from_timestamp(secs, micros * 1_000).unwrap_or_default()
        })
    }

    pub fn arb_record_id() -> impl Strategy<Value = RecordId> {
        prop_oneof![
            any::<i64>().prop_map(RecordId::Int),
            arb_uuid().prop_map(RecordId::Uuid),
            "[a-z0-9-]{1,32}".prop_map(RecordId::Text),
        ]
    }

    pub fn arb_version() -> impl Strategy<Value = Version> {
        prop_oneof![
            any::<i64>().prop_map(Version::Counter),
            arb_timestamp().prop_map(Version::Timestamp),
        ]
    }

    pub fn arb_record_type() -> impl Strategy<Value = RecordType> {
        "[A-Z][A-Za-z0-9_]{0,30}".prop_map(RecordType::new)
    }

    pub fn arb_namespace() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_.-]{0,40}"
    }

    pub fn arb_field_value() -> impl Strategy<Value = FieldValue> {
        prop_oneof![
            any::<bool>().prop_map(FieldValue::Bool),
            any::<i64>().prop_map(FieldValue::Int),
            "[a-z ]{0,16}".prop_map(FieldValue::Text),
        ]
    }

    /// Predicates over the [`Item`] fields with optional order and window.
    pub fn arb_predicate() -> impl Strategy<Value = Predicate> {
        let field = prop_oneof![Just("name"), Just("category"), Just("price_cents")];
        let direction = prop_oneof![Just(SortDirection::Asc), Just(SortDirection::Desc)];
        (
            prop::collection::vec((field.clone(), arb_field_value()), 0..3),
            prop::option::of((field, direction)),
            prop::option::of(1u64..100),
            prop::option::of(0u64..100),
        )
            .prop_map(|(filters, order, limit, offset)| {
                let mut predicate = Predicate::new();
                for (field, value) in filters {
                    predicate = predicate.where_eq(field, value);
                }
                if let Some((field, direction)) = order {
                    predicate = predicate.order_by(field, direction);
                }
                if let Some(limit) = limit {
                    predicate = predicate.limit(limit);
                }
                if let Some(offset) = offset {
                    predicate = predicate.offset(offset);
                }
                predicate
            })
    }

    pub fn arb_metadata() -> impl Strategy<Value = VersionMetadata> {
        prop_oneof![
            (arb_record_id(), arb_version())
                .prop_map(|(id, version)| VersionMetadata::record(Some((id, version)))),
            (prop::option::of(arb_version()), 0u64..10_000, any::<u64>()).prop_map(
                |(max, count, checksum)| {
                    VersionMetadata::aggregate(
                        AggregateProbe::new(max, count)
                            .with_checksum(VersionChecksum::from_raw(checksum)),
                    )
                }
            ),
            Just(VersionMetadata::Empty),
        ]
    }

    pub fn arb_descriptor() -> impl Strategy<Value = QueryDescriptor> {
        prop_oneof![
            (arb_record_type(), arb_record_id())
                .prop_map(|(record_type, id)| QueryDescriptor::find(record_type, id)),
            (
                arb_record_type(),
                prop::collection::vec(arb_record_id(), 1..8)
            )
                .prop_map(|(record_type, ids)| QueryDescriptor::find_many(record_type, ids)),
            (arb_record_type(), arb_predicate())
                .prop_map(|(record_type, predicate)| QueryDescriptor::matching(record_type, predicate)),
        ]
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache reads and VERSO error variants.

    use super::*;

    #[track_caller]
    pub fn assert_hit<T: std::fmt::Debug>(read: &CacheRead<T>) {
        assert!(read.was_cache_hit(), "Expected cache hit, got miss: {:?}", read);
    }

    #[track_caller]
    pub fn assert_miss<T: std::fmt::Debug>(read: &CacheRead<T>) {
        assert!(read.was_cache_miss(), "Expected cache miss, got hit: {:?}", read);
    }

    /// Assert a key has the shape `{namespace}:{record_type}:{kind}:{digest}`.
    #[track_caller]
    pub fn assert_key_shape(key: &CacheKey, namespace: &str, record_type: &str, kind: &str) {
        let prefix = format!("{}:{}:{}:", namespace, record_type, kind);
        assert!(
            key.as_str().starts_with(&prefix),
            "Expected key to start with {:?}, got {:?}",
            prefix,
            key.as_str()
        );
        let digest = key.digest_hex();
        assert_eq!(digest.len(), 64, "Digest should be 64 hex chars: {:?}", digest);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[track_caller]
    pub fn assert_probe_failure<T: std::fmt::Debug>(result: &VersoResult<T>) {
        match result {
            Err(err) if err.is_probe_failure() => {}
            other => panic!("Expected probe failure, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_load_failure<T: std::fmt::Debug>(result: &VersoResult<T>) {
        match result {
            Err(err) if err.is_load_failure() => {}
            other => panic!("Expected load failure, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_cache_error<T: std::fmt::Debug>(result: &VersoResult<T>) {
        match result {
            Err(VersoError::Cache(_)) => {}
            other => panic!("Expected Cache error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &VersoResult<T>) {
        match result {
            Err(VersoError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }
}
