//! Configuration and Backend Tests
//!
//! Per-record-type settings (version field, TTL, enabled) resolved from
//! `CacheConfig`, TOML loading, and the read path over the LMDB backend.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use verso_storage::LmdbCacheStore;
use verso_test_utils::assertions::{assert_hit, assert_key_shape, assert_miss};
use verso_test_utils::fixtures;
use verso_test_utils::{
    CacheAside, CacheConfig, CacheFailurePolicy, CacheStore, InMemoryCacheStore, Item, Predicate,
    RecordType, RecordTypeConfig,
};

fn disabled_items() -> CacheConfig {
    fixtures::test_config().with_record_type(
        "Item",
        RecordTypeConfig {
            version_field: Some("modified_at".to_string()),
            enabled: false,
            ..RecordTypeConfig::default()
        },
    )
}

// ============================================================================
// DISABLED RECORD TYPES
// ============================================================================

#[tokio::test]
async fn test_disabled_type_bypasses_cache() {
    let store = fixtures::item_store();
    let cache = Arc::new(InMemoryCacheStore::new());
    let aside = CacheAside::new(Arc::clone(&cache), disabled_items()).expect("config");
    let items = aside.records::<Item, _>(&store);
    assert!(!items.settings().enabled);

    for _ in 0..2 {
        let read = items.find_with_cache(1).await.expect("read").expect("item 1");
        assert_miss(&read);
        assert!(read.key().is_none());
    }
    let set = items
        .all_with_cache(Predicate::new().where_eq("category", "garden"))
        .await
        .expect("read");
    assert_eq!(set.value().len(), 2);
    assert!(set.key().is_none());

    assert_eq!(store.calls().probes(), 0);
    assert_eq!(store.calls().load_single, 2);
    assert_eq!(store.calls().load_many, 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_disabled_type_still_returns_none_for_absent_ids() {
    let store = fixtures::item_store();
    let aside =
        CacheAside::new(Arc::new(InMemoryCacheStore::new()), disabled_items()).expect("config");
    let items = aside.records::<Item, _>(&store);

    let reads = items.find_many_with_cache([2, 77]).await.expect("read");
    assert!(reads[0].is_some());
    assert!(reads[1].is_none());
}

// ============================================================================
// SETTINGS
// ============================================================================

#[tokio::test]
async fn test_ttl_expires_entries() {
    let store = fixtures::item_store();
    let config = fixtures::test_config().with_record_type(
        "Item",
        RecordTypeConfig {
            version_field: Some("modified_at".to_string()),
            ttl_secs: Some(1),
            ..RecordTypeConfig::default()
        },
    );
    let aside = CacheAside::new(Arc::new(InMemoryCacheStore::new()), config).expect("config");
    let items = aside.records::<Item, _>(&store);
    assert_eq!(items.settings().ttl, Some(Duration::from_secs(1)));

    items.find_with_cache(1).await.expect("read");
    assert_hit(&items.find_with_cache(1).await.expect("read").expect("item 1"));

    std::thread::sleep(Duration::from_millis(1100));
    assert_miss(&items.find_with_cache(1).await.expect("read").expect("item 1"));
}

#[tokio::test]
async fn test_namespace_prefixes_keys() {
    let store = fixtures::item_store();
    let config = fixtures::test_config().with_namespace("shop-eu");
    let aside = CacheAside::new(Arc::new(InMemoryCacheStore::new()), config).expect("config");
    let items = aside.records::<Item, _>(&store);

    let read = items.find_with_cache(1).await.expect("read").expect("item 1");
    assert_key_shape(read.key().expect("key"), "shop-eu", "Item", "one");
}

#[test]
fn test_invalid_config_rejected() {
    let bad_namespace = CacheConfig::new().with_namespace("has space");
    assert!(CacheAside::new(Arc::new(InMemoryCacheStore::new()), bad_namespace).is_err());

    let zero_ttl = CacheConfig::new().with_record_type(
        "Item",
        RecordTypeConfig {
            ttl_secs: Some(0),
            ..RecordTypeConfig::default()
        },
    );
    assert!(zero_ttl.validate().is_err());
}

#[test]
fn test_toml_config_resolves_settings() {
    let config = CacheConfig::from_toml_str(
        r#"
        namespace = "shop"
        default_ttl_secs = 600
        on_cache_failure = "propagate"

        [record_types.Item]
        version_field = "modified_at"

        [record_types.AuditLog]
        enabled = false
        "#,
    )
    .expect("parse");

    assert_eq!(config.on_cache_failure, CacheFailurePolicy::Propagate);

    let item = config.settings_for(&RecordType::new("Item"));
    assert_eq!(item.version_field, "modified_at");
    assert_eq!(item.ttl, Some(Duration::from_secs(600)));
    assert!(item.enabled);

    let audit = config.settings_for(&RecordType::new("AuditLog"));
    assert_eq!(audit.version_field, "updated_at");
    assert!(!audit.enabled);
}

#[test]
fn test_toml_unknown_field_rejected() {
    assert!(CacheConfig::from_toml_str("namespce = \"typo\"").is_err());
}

// ============================================================================
// LMDB BACKEND
// ============================================================================

#[tokio::test]
async fn test_read_path_over_lmdb() {
    let dir = TempDir::new().expect("tempdir");
    let cache = Arc::new(LmdbCacheStore::new(dir.path(), 16).expect("lmdb"));
    let store = fixtures::item_store();
    let aside = fixtures::cache_aside(Arc::clone(&cache)).expect("config");
    let items = aside.records::<Item, _>(&store);

    assert_miss(&items.find_with_cache(1).await.expect("read").expect("item 1"));
    let hit = items.find_with_cache(1).await.expect("read").expect("item 1");
    assert_hit(&hit);
    assert_eq!(hit.value().name, "hammer");

    let tools = || Predicate::new().where_eq("category", "tools");
    assert_miss(&items.all_with_cache(tools()).await.expect("read"));
    assert_hit(&items.all_with_cache(tools()).await.expect("read"));

    let stats = cache.stats().await.expect("stats");
    assert_eq!(stats.entry_count, 2);
    assert_eq!(stats.hits, 2);
}
