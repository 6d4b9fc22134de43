//! Multi-Record Strategy Tests
//!
//! `all_with_cache`, `query` and `first_with_cache` probe
//! `(max(version), count, checksum)` over the predicate's filters and key
//! the whole descriptor on it:
//! - An insert, update or delete inside the filters changes the key
//! - A delete that leaves the maximum version alone still changes the count
//! - An update that stays below the maximum still changes the checksum
//! - Writes outside the filters leave the entry valid
//! - Order, limit and offset are part of the key

use std::sync::Arc;

use verso_storage::{CacheRead, FilterOperator, RecordSet};
use verso_test_utils::assertions::{
    assert_hit, assert_key_shape, assert_miss, assert_validation_error,
};
use verso_test_utils::fixtures::{self, at};
use verso_test_utils::{
    Document, FilterExpr, InMemoryCacheStore, Item, Predicate, QueryDescriptor, RecordId,
    SortDirection,
};

fn tools() -> Predicate {
    Predicate::new().where_eq("category", "tools")
}

fn names(read: &CacheRead<RecordSet<Item>>) -> Vec<String> {
    read.value().iter().map(|item| item.name.clone()).collect()
}

// ============================================================================
// VERSION AND COUNT
// ============================================================================

#[tokio::test]
async fn test_repeated_query_hits() {
    let store = fixtures::item_store();
    let aside = fixtures::cache_aside(Arc::new(InMemoryCacheStore::new())).expect("config");
    let items = aside.records::<Item, _>(&store);

    let first = items.all_with_cache(tools()).await.expect("read");
    assert_miss(&first);
    assert_eq!(first.value().len(), 3);
    let key = first.key().cloned().expect("key");
    assert_key_shape(&key, "test", "Item", "set");

    let second = items.all_with_cache(tools()).await.expect("read");
    assert_hit(&second);
    assert_eq!(second.key(), Some(&key));
    assert_eq!(names(&second), names(&first));
    assert_eq!(store.calls().load_many, 1);
    assert_eq!(store.calls().probe_aggregate, 2);
}

#[tokio::test]
async fn test_delete_below_max_version_changes_key() {
    let store = fixtures::item_store();
    let aside = fixtures::cache_aside(Arc::new(InMemoryCacheStore::new())).expect("config");
    let items = aside.records::<Item, _>(&store);

    // Tools: hammer at(1), wrench at(2), saw at(5)
    let before = items.all_with_cache(tools()).await.expect("read");
    assert_miss(&before);

    // Dropping the hammer keeps max(modified_at) at at(5)
    store.remove(&RecordId::Int(1)).await;

    let after = items.all_with_cache(tools()).await.expect("read");
    assert_miss(&after);
    assert_ne!(before.key(), after.key());
    assert_eq!(after.value().len(), 2);
    assert_eq!(store.calls().load_many, 2);
}

#[tokio::test]
async fn test_delete_of_max_version_changes_key() {
    let store = fixtures::item_store();
    let aside = fixtures::cache_aside(Arc::new(InMemoryCacheStore::new())).expect("config");
    let items = aside.records::<Item, _>(&store);

    // The saw holds the unique maximum at(5) among tools
    let before = items.all_with_cache(tools()).await.expect("read");
    store.remove(&RecordId::Int(3)).await;

    let after = items.all_with_cache(tools()).await.expect("read");
    assert_miss(&after);
    assert_ne!(before.key(), after.key());
    assert_eq!(names(&after), vec!["hammer", "wrench"]);
}

#[tokio::test]
async fn test_counter_update_below_max_changes_key() {
    let store = fixtures::document_store();
    let aside = fixtures::cache_aside(Arc::new(InMemoryCacheStore::new())).expect("config");
    let documents = aside.records::<Document, _>(&store);

    // intro is at revision 1, setup at revision 4
    let before = documents.all_with_cache(Predicate::new()).await.expect("read");
    assert_miss(&before);

    store
        .update(&RecordId::from("intro"), |doc| {
            doc.title = "Intro v2".to_string();
            doc.revision = 2;
        })
        .await;

    let after = documents.all_with_cache(Predicate::new()).await.expect("read");
    assert_miss(&after);
    assert_ne!(before.key(), after.key());
    let titles: Vec<&str> = after.value().iter().map(|d| d.title.as_str()).collect();
    assert_eq!(titles, vec!["Intro v2", "Setup"]);
}

#[tokio::test]
async fn test_counter_bump_below_max_refreshes_set() {
    let store = fixtures::document_store();
    let aside = fixtures::cache_aside(Arc::new(InMemoryCacheStore::new())).expect("config");
    let documents = aside.records::<Document, _>(&store);

    let before = documents.all_with_cache(Predicate::new()).await.expect("read");
    documents.bump_version("intro").await.expect("bump");

    let after = documents.all_with_cache(Predicate::new()).await.expect("read");
    assert_miss(&after);
    assert_ne!(before.key(), after.key());
    assert_eq!(store.calls().load_many, 2);
}

#[tokio::test]
async fn test_update_inside_filters_changes_key() {
    let store = fixtures::item_store();
    let aside = fixtures::cache_aside(Arc::new(InMemoryCacheStore::new())).expect("config");
    let items = aside.records::<Item, _>(&store);

    items.all_with_cache(tools()).await.expect("read");
    store
        .update(&RecordId::Int(2), |item| {
            item.price_cents = 999;
            item.modified_at = at(60);
        })
        .await;

    let read = items.all_with_cache(tools()).await.expect("read");
    assert_miss(&read);
    let wrench = read
        .value()
        .iter()
        .find(|item| item.id == 2)
        .expect("wrench");
    assert_eq!(wrench.price_cents, 999);
}

#[tokio::test]
async fn test_insert_inside_filters_changes_key() {
    let store = fixtures::item_store();
    let aside = fixtures::cache_aside(Arc::new(InMemoryCacheStore::new())).expect("config");
    let items = aside.records::<Item, _>(&store);

    items.all_with_cache(tools()).await.expect("read");
    store
        .upsert(fixtures::item(6, "drill", "tools", 8000, at(0)))
        .await;

    let read = items.all_with_cache(tools()).await.expect("read");
    assert_miss(&read);
    assert_eq!(read.value().len(), 4);
}

#[tokio::test]
async fn test_write_outside_filters_keeps_entry() {
    let store = fixtures::item_store();
    let aside = fixtures::cache_aside(Arc::new(InMemoryCacheStore::new())).expect("config");
    let items = aside.records::<Item, _>(&store);

    items.all_with_cache(tools()).await.expect("read");
    fixtures::touch_item(&store, 4, at(500)).await;
    store
        .upsert(fixtures::item(7, "shears", "garden", 900, at(600)))
        .await;

    let read = items.all_with_cache(tools()).await.expect("read");
    assert_hit(&read);
}

// ============================================================================
// ORDER AND WINDOW
// ============================================================================

#[tokio::test]
async fn test_pages_are_cached_separately() {
    let store = fixtures::item_store();
    let cache = Arc::new(InMemoryCacheStore::new());
    let aside = fixtures::cache_aside(Arc::clone(&cache)).expect("config");
    let items = aside.records::<Item, _>(&store);

    let page = |offset: u64| {
        items
            .all_with_cache(tools())
            .order_by("name", SortDirection::Asc)
            .limit(2)
            .offset(offset)
    };

    let first = page(0).await.expect("read");
    let second = page(2).await.expect("read");
    assert_eq!(names(&first), vec!["hammer", "saw"]);
    assert_eq!(names(&second), vec!["wrench"]);
    assert_ne!(first.key(), second.key());
    assert_eq!(cache.len(), 2);

    assert_hit(&page(0).await.expect("read"));
    assert_hit(&page(2).await.expect("read"));
    assert_eq!(store.calls().load_many, 2);
}

#[tokio::test]
async fn test_order_is_part_of_key() {
    let store = fixtures::item_store();
    let aside = fixtures::cache_aside(Arc::new(InMemoryCacheStore::new())).expect("config");
    let items = aside.records::<Item, _>(&store);

    let asc = items
        .query()
        .order_by("price_cents", SortDirection::Asc)
        .await
        .expect("read");
    let desc = items
        .query()
        .order_by("price_cents", SortDirection::Desc)
        .await
        .expect("read");

    assert_miss(&desc);
    assert_ne!(asc.key(), desc.key());
    assert_eq!(asc.value().first().map(|i| i.id), Some(2));
    assert_eq!(desc.value().first().map(|i| i.id), Some(5));
}

#[tokio::test]
async fn test_filter_order_does_not_change_key() {
    let store = fixtures::item_store();
    let aside = fixtures::cache_aside(Arc::new(InMemoryCacheStore::new())).expect("config");
    let items = aside.records::<Item, _>(&store);
    let cheap = FilterExpr::new("price_cents", FilterOperator::Lt, 2000);

    let a = items
        .all_with_cache(tools().filter(cheap.clone()))
        .await
        .expect("read");
    let b = items
        .all_with_cache(Predicate::new().filter(cheap).where_eq("category", "tools"))
        .await
        .expect("read");

    assert_hit(&b);
    assert_eq!(a.key(), b.key());
    assert_eq!(names(&b), vec!["hammer", "wrench"]);
}

// ============================================================================
// EMPTY RESULTS AND FIRST
// ============================================================================

#[tokio::test]
async fn test_empty_result_is_cached() {
    let store = fixtures::item_store();
    let cache = Arc::new(InMemoryCacheStore::new());
    let aside = fixtures::cache_aside(Arc::clone(&cache)).expect("config");
    let items = aside.records::<Item, _>(&store);
    let kitchen = || Predicate::new().where_eq("category", "kitchen");

    let first = items.all_with_cache(kitchen()).await.expect("read");
    assert_miss(&first);
    assert!(first.value().is_empty());
    assert_eq!(cache.len(), 1);

    let second = items.all_with_cache(kitchen()).await.expect("read");
    assert_hit(&second);
    assert!(second.value().is_empty());
    assert_eq!(store.calls().load_many, 1);

    // The first matching insert moves the count off zero
    store
        .upsert(fixtures::item(8, "kettle", "kitchen", 2000, at(0)))
        .await;
    let third = items.all_with_cache(kitchen()).await.expect("read");
    assert_miss(&third);
    assert_eq!(third.value().len(), 1);
}

#[tokio::test]
async fn test_first_with_cache() {
    let store = fixtures::item_store();
    let aside = fixtures::cache_aside(Arc::new(InMemoryCacheStore::new())).expect("config");
    let items = aside.records::<Item, _>(&store);
    let priciest = || Predicate::new().order_by("price_cents", SortDirection::Desc);

    let first = items
        .first_with_cache(priciest())
        .await
        .expect("read")
        .expect("an item");
    assert_miss(&first);
    assert_eq!(first.value().name, "hose");

    let again = items
        .first_with_cache(priciest())
        .await
        .expect("read")
        .expect("an item");
    assert_hit(&again);

    // Distinct from the unlimited query over the same predicate
    let all = items.all_with_cache(priciest()).await.expect("read");
    assert_miss(&all);
    assert_ne!(all.key(), first.key());
}

#[tokio::test]
async fn test_first_with_cache_on_empty_set() {
    let store = fixtures::item_store();
    let aside = fixtures::cache_aside(Arc::new(InMemoryCacheStore::new())).expect("config");
    let items = aside.records::<Item, _>(&store);

    let read = items
        .first_with_cache(Predicate::new().where_eq("category", "kitchen"))
        .await
        .expect("read");
    assert!(read.is_none());
}

// ============================================================================
// DESCRIPTORS
// ============================================================================

#[tokio::test]
async fn test_id_descriptor_uses_single_record_strategy() {
    let store = fixtures::item_store();
    let aside = fixtures::cache_aside(Arc::new(InMemoryCacheStore::new())).expect("config");
    let items = aside.records::<Item, _>(&store);
    let descriptor =
        || QueryDescriptor::find_many("Item", [RecordId::Int(5), RecordId::Int(2), RecordId::Int(42)]);

    let first = items.fetch(descriptor()).await.expect("read");
    assert_miss(&first);
    assert_eq!(
        first.value().iter().map(|i| i.id).collect::<Vec<_>>(),
        vec![2, 5]
    );
    assert_eq!(store.calls().probe_single, 3);
    assert_eq!(store.calls().probe_aggregate, 0);

    let second = items.fetch(descriptor()).await.expect("read");
    assert_hit(&second);
    assert_eq!(store.calls().load_single, 2);
}

#[tokio::test]
async fn test_refined_id_descriptor_becomes_set_query() {
    let store = fixtures::item_store();
    let aside = fixtures::cache_aside(Arc::new(InMemoryCacheStore::new())).expect("config");
    let items = aside.records::<Item, _>(&store);

    let read = items
        .fetch(QueryDescriptor::find_many(
            "Item",
            [RecordId::Int(1), RecordId::Int(4)],
        ))
        .where_eq("category", "garden")
        .await
        .expect("read");
    assert_eq!(read.value().iter().map(|i| i.id).collect::<Vec<_>>(), vec![4]);
    assert_key_shape(read.key().expect("key"), "test", "Item", "set");
}

#[tokio::test]
async fn test_refined_text_id_descriptor_keeps_its_rows() {
    let store = fixtures::document_store();
    let aside = fixtures::cache_aside(Arc::new(InMemoryCacheStore::new())).expect("config");
    let documents = aside.records::<Document, _>(&store);

    let plain = documents
        .fetch(QueryDescriptor::find("Document", "intro"))
        .await
        .expect("read");
    let limited = documents
        .fetch(QueryDescriptor::find("Document", "intro"))
        .limit(1)
        .await
        .expect("read");
    assert_eq!(plain.value().len(), 1);
    assert_eq!(limited.value().len(), 1);
    assert_eq!(limited.value()[0].slug, "intro");

    let both = documents
        .fetch(QueryDescriptor::find_many(
            "Document",
            [RecordId::from("intro"), RecordId::from("setup")],
        ))
        .order_by("revision", SortDirection::Desc)
        .await
        .expect("read");
    let slugs: Vec<&str> = both.value().iter().map(|d| d.slug.as_str()).collect();
    assert_eq!(slugs, vec!["setup", "intro"]);
    assert_key_shape(both.key().expect("key"), "test", "Document", "set");
}

#[tokio::test]
async fn test_descriptor_for_other_record_type_rejected() {
    let store = fixtures::item_store();
    let aside = fixtures::cache_aside(Arc::new(InMemoryCacheStore::new())).expect("config");
    let items = aside.records::<Item, _>(&store);

    let result = items.fetch(QueryDescriptor::all("Document")).await;
    assert_validation_error(&result);
    assert_eq!(store.calls().probes(), 0);
}

#[tokio::test]
async fn test_result_sets_are_shared_and_read_only() {
    let store = fixtures::item_store();
    let aside = fixtures::cache_aside(Arc::new(InMemoryCacheStore::new())).expect("config");
    let items = aside.records::<Item, _>(&store);

    let read = items.all_with_cache(tools()).await.expect("read");
    let shared = read.value().clone();
    assert!(shared.ptr_eq(read.value()));

    let mut owned = shared.to_vec();
    owned[0].name = "changed".to_string();

    let again = items.all_with_cache(tools()).await.expect("read");
    assert!(again.value().iter().all(|item| item.name != "changed"));
}
