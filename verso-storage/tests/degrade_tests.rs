//! Cache Failure Policy Tests
//!
//! Under `Degrade` (the default) a failing cache store never fails a read:
//! a failed get or an undecodable entry is a miss, a failed put is logged,
//! and the result is flagged `degraded`. Under `Propagate` the cache error
//! is returned. Store errors surface under either policy.

use std::sync::Arc;

use verso_test_utils::assertions::{
    assert_cache_error, assert_hit, assert_load_failure, assert_miss,
};
use verso_test_utils::fixtures;
use verso_test_utils::{
    init_test_tracing, CacheAside, CacheFailurePolicy, FlakyCacheStore, Item, Predicate,
};

fn propagating(cache: Arc<FlakyCacheStore>) -> CacheAside<FlakyCacheStore> {
    CacheAside::new(
        cache,
        fixtures::test_config().with_failure_policy(CacheFailurePolicy::Propagate),
    )
    .expect("config")
}

// ============================================================================
// DEGRADE
// ============================================================================

#[tokio::test]
async fn test_failed_get_is_a_miss() {
    init_test_tracing();
    let store = fixtures::item_store();
    let cache = Arc::new(FlakyCacheStore::new());
    let aside = fixtures::cache_aside(Arc::clone(&cache)).expect("config");
    let items = aside.records::<Item, _>(&store);

    cache.fail_gets(true);
    let read = items.find_with_cache(1).await.expect("read").expect("item 1");
    assert_miss(&read);
    assert!(read.degraded());
    assert_eq!(read.value().name, "hammer");
    assert_eq!(store.calls().load_single, 1);

    // The put still goes through, so the entry is there once gets recover
    assert_eq!(cache.puts(), 1);
    cache.fail_gets(false);
    let recovered = items.find_with_cache(1).await.expect("read").expect("item 1");
    assert_hit(&recovered);
    assert!(!recovered.degraded());
    assert_eq!(aside.metrics().degraded, 1);
}

#[tokio::test]
async fn test_failed_put_returns_loaded_result() {
    let store = fixtures::item_store();
    let cache = Arc::new(FlakyCacheStore::new());
    let aside = fixtures::cache_aside(Arc::clone(&cache)).expect("config");
    let items = aside.records::<Item, _>(&store);

    cache.fail_puts(true);
    let read = items.find_with_cache(2).await.expect("read").expect("item 2");
    assert_miss(&read);
    assert!(read.degraded());
    assert!(cache.is_empty());

    let again = items.find_with_cache(2).await.expect("read").expect("item 2");
    assert_miss(&again);
    assert_eq!(store.calls().load_single, 2);
    assert_eq!(aside.metrics().writes, 0);
}

#[tokio::test]
async fn test_batch_flags_only_affected_reads() {
    let store = fixtures::item_store();
    let cache = Arc::new(FlakyCacheStore::new());
    let aside = fixtures::cache_aside(Arc::clone(&cache)).expect("config");
    let items = aside.records::<Item, _>(&store);

    items.find_many_with_cache([1, 2]).await.expect("warm");
    cache.fail_puts(true);

    let reads = items.find_many_with_cache([1, 2, 3]).await.expect("read");
    let hammer = reads[0].as_ref().expect("item 1");
    let wrench = reads[1].as_ref().expect("item 2");
    let saw = reads[2].as_ref().expect("item 3");

    assert_hit(hammer);
    assert!(!hammer.degraded());
    assert_hit(wrench);
    assert!(!wrench.degraded());
    assert_miss(saw);
    assert!(saw.degraded());
    assert_eq!(aside.metrics().degraded, 1);
}

#[tokio::test]
async fn test_corrupt_entry_is_a_miss() {
    let store = fixtures::item_store();
    let cache = Arc::new(FlakyCacheStore::new());
    let aside = fixtures::cache_aside(Arc::clone(&cache)).expect("config");
    let items = aside.records::<Item, _>(&store);

    items.find_with_cache(3).await.expect("read");
    cache.corrupt_reads(true);

    let read = items.find_with_cache(3).await.expect("read").expect("item 3");
    assert_miss(&read);
    assert!(read.degraded());
    assert_eq!(read.value().name, "saw");
    assert_eq!(store.calls().load_single, 2);
}

#[tokio::test]
async fn test_set_query_degrades() {
    let store = fixtures::item_store();
    let cache = Arc::new(FlakyCacheStore::new());
    let aside = fixtures::cache_aside(Arc::clone(&cache)).expect("config");
    let items = aside.records::<Item, _>(&store);

    cache.fail_gets(true);
    cache.fail_puts(true);
    let read = items
        .all_with_cache(Predicate::new().where_eq("category", "garden"))
        .await
        .expect("read");
    assert_miss(&read);
    assert!(read.degraded());
    assert_eq!(read.value().len(), 2);
    assert_eq!(aside.metrics().degraded, 2);
}

#[tokio::test]
async fn test_store_errors_still_surface() {
    let store = fixtures::item_store();
    let cache = Arc::new(FlakyCacheStore::new());
    let aside = fixtures::cache_aside(Arc::clone(&cache)).expect("config");
    let items = aside.records::<Item, _>(&store);

    cache.fail_gets(true);
    store.fail_loads(true);
    let result = items.find_with_cache(1).await;
    assert_load_failure(&result);
}

// ============================================================================
// PROPAGATE
// ============================================================================

#[tokio::test]
async fn test_propagate_returns_get_error() {
    let store = fixtures::item_store();
    let cache = Arc::new(FlakyCacheStore::new());
    let aside = propagating(Arc::clone(&cache));
    let items = aside.records::<Item, _>(&store);

    cache.fail_gets(true);
    let result = items.find_with_cache(1).await;
    assert_cache_error(&result);
    assert!(result.expect_err("cache error").is_cache_unavailable());
    assert_eq!(store.calls().loads(), 0);
}

#[tokio::test]
async fn test_propagate_returns_put_error() {
    let store = fixtures::item_store();
    let cache = Arc::new(FlakyCacheStore::new());
    let aside = propagating(Arc::clone(&cache));
    let items = aside.records::<Item, _>(&store);

    cache.fail_puts(true);
    let result = items.all_with_cache(Predicate::new()).await;
    assert_cache_error(&result);
    assert_eq!(store.calls().load_many, 1);
}

#[tokio::test]
async fn test_propagate_returns_decode_error() {
    let store = fixtures::item_store();
    let cache = Arc::new(FlakyCacheStore::new());
    let aside = propagating(Arc::clone(&cache));
    let items = aside.records::<Item, _>(&store);

    items.find_with_cache(1).await.expect("read");
    cache.corrupt_reads(true);
    let result = items.find_with_cache(1).await;
    assert_cache_error(&result);
}
