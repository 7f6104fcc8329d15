//! Versioned store behavior over the seeded catalog.
//!
//! Covers version resolution through the registry, partial bulk reads,
//! destination checks, bulk-write atomicity, version isolation and replay of
//! single-record write sequences.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use proptest::prelude::*;
use tokio::runtime::Runtime;
use vercache_storage::{
    CacheGetter, CacheGetterExt, CacheSetter, CacheSetterExt, CacheStorageConfig,
    CacheStorageError, CacheVersion, ErrorKind, Keyed, MemoryEngine, RequestContext, Sequence,
    Single, VersionedStore, LATEST_VERSION,
};
use vercache_core::EngineError;
use vercache_test_utils::assertions::{assert_invalid_destination, assert_not_found, assert_other};
use vercache_test_utils::fixtures::{
    catalog, catalog_item, registry_entries, seed_catalog, seeded_memory_store, CatalogItem,
    CATALOG_COLLECTION, CATALOG_VERSION,
};
use vercache_test_utils::generators::{arb_catalog, arb_catalog_item, arb_version};
use vercache_test_utils::FaultyEngine;

fn ids(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|id| id.to_string()).collect()
}

// ============================================================================
// READS
// ============================================================================

#[tokio::test]
async fn get_by_id_returns_seeded_item() {
    let store = seeded_memory_store().await;
    let ctx = RequestContext::new();

    let item: CatalogItem = store
        .get(&ctx, CATALOG_COLLECTION, "1", CATALOG_VERSION)
        .await
        .expect("seeded item should be readable");
    assert_eq!(Some(item), catalog_item("1"));

    let missing = store
        .get::<CatalogItem>(&ctx, CATALOG_COLLECTION, "9", CATALOG_VERSION)
        .await;
    assert_not_found(&missing);
}

#[tokio::test]
async fn get_many_returns_found_and_names_missing() {
    let store = seeded_memory_store().await;
    let ctx = RequestContext::new();

    let found: HashMap<String, CatalogItem> = store
        .get_many(&ctx, CATALOG_COLLECTION, &ids(&["1", "2", "3"]), CATALOG_VERSION)
        .await
        .expect("all ids exist");
    assert_eq!(found.len(), 3);
    assert_eq!(found.get("1"), catalog_item("1").as_ref());

    let mut partial: HashMap<String, CatalogItem> = HashMap::new();
    let err = store
        .get_many_by_ids(
            &ctx,
            CATALOG_COLLECTION,
            &ids(&["1", "2", "9"]),
            CATALOG_VERSION,
            &mut Keyed::new(&mut partial),
        )
        .await
        .expect_err("id 9 is missing");
    assert!(err.is_not_found());
    assert_eq!(err.not_found_ids(), ids(&["9"]).as_slice());
    assert_eq!(partial.len(), 2);
}

#[tokio::test]
async fn get_all_returns_whole_version() {
    let store = seeded_memory_store().await;
    let all: HashMap<String, CatalogItem> = store
        .get_all_values(&RequestContext::new(), CATALOG_COLLECTION, CATALOG_VERSION)
        .await
        .expect("get_all should succeed");
    assert_eq!(all.len(), catalog().len());
    for item in catalog() {
        assert_eq!(all.get(&item.id), Some(&item));
    }
}

#[tokio::test]
async fn get_array_reads_sequence() {
    let store = seeded_memory_store().await;
    let items: Vec<CatalogItem> = store
        .get_array(&RequestContext::new(), CATALOG_COLLECTION, "2", CATALOG_VERSION)
        .await
        .expect("array read should succeed");
    assert_eq!(items, catalog_item("2").into_iter().collect::<Vec<_>>());
}

// ============================================================================
// VERSION REGISTRY
// ============================================================================

#[tokio::test]
async fn registry_lists_every_entry() {
    let store = seeded_memory_store().await;
    let mut versions = store
        .get_latest_versions(&RequestContext::new())
        .await
        .expect("registry read should succeed");
    let mut expected = registry_entries();
    versions.sort_by(|a, b| a.collection_name.cmp(&b.collection_name));
    expected.sort_by(|a, b| a.collection_name.cmp(&b.collection_name));
    assert_eq!(versions, expected);
}

#[tokio::test]
async fn registry_lookup_by_collection() {
    let store = seeded_memory_store().await;
    let ctx = RequestContext::new();

    let stores = store
        .get_latest_collection_version(&ctx, "stores")
        .await
        .expect("stores are registered");
    assert_eq!(stores, CacheVersion::new("stores", "2"));

    let unknown = store
        .get_latest_collection_version(&ctx, "unknownCollection")
        .await;
    assert_not_found(&unknown);
}

#[tokio::test]
async fn latest_reads_match_explicit_version_reads() {
    let store = seeded_memory_store().await;
    let ctx = RequestContext::new();

    for item in catalog() {
        let latest: CatalogItem = store
            .get(&ctx, CATALOG_COLLECTION, &item.id, LATEST_VERSION)
            .await
            .expect("latest read should succeed");
        let explicit: CatalogItem = store
            .get(&ctx, CATALOG_COLLECTION, &item.id, CATALOG_VERSION)
            .await
            .expect("explicit read should succeed");
        assert_eq!(latest, explicit);
    }
}

#[tokio::test]
async fn version_bump_redirects_latest() {
    let store = seeded_memory_store().await;
    let ctx = RequestContext::new();
    let config = CacheStorageConfig::default();

    store
        .insert_value(
            &ctx,
            CATALOG_COLLECTION,
            "1",
            "2",
            &CatalogItem::new("1", "Item1 v2", 11.0),
        )
        .await
        .expect("insert into version 2 should succeed");
    store
        .update_value(
            &ctx,
            &config.registry_collection,
            CATALOG_COLLECTION,
            &config.registry_version,
            &CacheVersion::new(CATALOG_COLLECTION, "2"),
        )
        .await
        .expect("registry bump should succeed");

    let latest: CatalogItem = store
        .get(&ctx, CATALOG_COLLECTION, "1", LATEST_VERSION)
        .await
        .expect("latest read should succeed");
    assert_eq!(latest.name, "Item1 v2");

    let old: CatalogItem = store
        .get(&ctx, CATALOG_COLLECTION, "1", CATALOG_VERSION)
        .await
        .expect("old version stays readable");
    assert_eq!(Some(old), catalog_item("1"));
}

// ============================================================================
// DESTINATION CHECKS
// ============================================================================

#[tokio::test]
async fn destination_shape_checked_before_engine_call() {
    let engine = Arc::new(FaultyEngine::new(MemoryEngine::new()));
    let store = VersionedStore::from_shared(Arc::clone(&engine), CacheStorageConfig::default())
        .expect("default config is valid");
    let ctx = RequestContext::new();

    let mut slot: Option<CatalogItem> = None;
    let mut map: HashMap<String, CatalogItem> = HashMap::new();
    let mut list: Vec<CatalogItem> = Vec::new();

    let mut results = Vec::new();
    results.push(
        store
            .get_by_id(&ctx, CATALOG_COLLECTION, "1", LATEST_VERSION, &mut Keyed::new(&mut map))
            .await,
    );
    results.push(
        store
            .get_many_by_ids(
                &ctx,
                CATALOG_COLLECTION,
                &ids(&["1"]),
                LATEST_VERSION,
                &mut Single::new(&mut slot),
            )
            .await,
    );
    results.push(
        store
            .get_all(&ctx, CATALOG_COLLECTION, LATEST_VERSION, &mut Sequence::new(&mut list))
            .await,
    );
    results.push(
        store
            .get_array_by_single_id(
                &ctx,
                CATALOG_COLLECTION,
                "1",
                LATEST_VERSION,
                &mut Keyed::new(&mut map),
            )
            .await,
    );
    results.push(
        store
            .get_and_lock_by_id(
                &ctx,
                CATALOG_COLLECTION,
                "1",
                LATEST_VERSION,
                &mut Sequence::new(&mut list),
            )
            .await,
    );

    for result in &results {
        assert_invalid_destination(result);
    }
    assert_eq!(engine.calls(), 0);
    assert!(slot.is_none() && map.is_empty() && list.is_empty());
}

#[tokio::test]
async fn decode_failure_leaves_destination_untouched() {
    let store = seeded_memory_store().await;
    let mut numbers: HashMap<String, u64> = HashMap::new();
    numbers.insert("keep".to_string(), 1);

    let err = store
        .get_all(
            &RequestContext::new(),
            CATALOG_COLLECTION,
            CATALOG_VERSION,
            &mut Keyed::new(&mut numbers),
        )
        .await
        .expect_err("catalog items are not numbers");
    assert!(matches!(err, CacheStorageError::Codec(_)));
    assert_eq!(numbers.len(), 1);
}

// ============================================================================
// WRITES
// ============================================================================

#[tokio::test]
async fn insert_many_is_best_effort() {
    let engine = Arc::new(FaultyEngine::new(MemoryEngine::new()));
    let store = VersionedStore::from_shared(Arc::clone(&engine), CacheStorageConfig::default())
        .expect("default config is valid");
    let ctx = RequestContext::new();
    let items: BTreeMap<String, CatalogItem> = catalog()
        .into_iter()
        .map(|item| (item.id.clone(), item))
        .collect();

    engine.limit_inserts(2);
    let result = store
        .insert_many_values(&ctx, CATALOG_COLLECTION, CATALOG_VERSION, &items)
        .await;
    assert_other(&result);

    engine.heal();
    let written: HashMap<String, CatalogItem> = store
        .get_all_values(&ctx, CATALOG_COLLECTION, CATALOG_VERSION)
        .await
        .expect("read should succeed");
    assert_eq!(written.len(), 2);
    assert!(written.contains_key("1") && written.contains_key("2"));
}

#[tokio::test]
async fn engine_failures_classify_as_other() {
    let engine = Arc::new(FaultyEngine::new(MemoryEngine::new()));
    let store = VersionedStore::from_shared(Arc::clone(&engine), CacheStorageConfig::default())
        .expect("default config is valid");
    seed_catalog(&store, &RequestContext::new())
        .await
        .expect("seeding should succeed");

    engine.fail_with(EngineError::Unavailable("connection reset".to_string()));
    let result = store
        .get::<CatalogItem>(&RequestContext::new(), CATALOG_COLLECTION, "1", CATALOG_VERSION)
        .await;
    assert_other(&result);
    assert!(!result.expect_err("engine is down").is_not_found());
}

#[tokio::test]
async fn remove_all_isolates_versions() {
    let store = seeded_memory_store().await;
    let ctx = RequestContext::new();
    store
        .insert_value(&ctx, CATALOG_COLLECTION, "1", "2", &CatalogItem::new("1", "v2", 1.0))
        .await
        .expect("insert should succeed");

    store
        .remove_all(&ctx, CATALOG_COLLECTION, "2")
        .await
        .expect("remove_all should succeed");

    let remaining: HashMap<String, CatalogItem> = store
        .get_all_values(&ctx, CATALOG_COLLECTION, CATALOG_VERSION)
        .await
        .expect("read should succeed");
    assert_eq!(remaining.len(), catalog().len());
}

#[tokio::test]
async fn client_handles_are_trait_objects() {
    let store = seeded_memory_store().await;
    let (getter, setter): (Arc<dyn CacheGetter>, Arc<dyn CacheSetter>) = store.client();
    let ctx = RequestContext::new();

    setter
        .remove(&ctx, CATALOG_COLLECTION, "4", CATALOG_VERSION)
        .await
        .expect("remove should succeed");
    let gone = getter
        .get::<CatalogItem>(&ctx, CATALOG_COLLECTION, "4", CATALOG_VERSION)
        .await;
    assert_not_found(&gone);
}

// ============================================================================
// PROPERTIES
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// GetAll on a version returns exactly what InsertMany wrote to it,
    /// regardless of what other versions hold.
    #[test]
    fn prop_get_all_returns_inserted_version(
        items in arb_catalog(12),
        other in arb_catalog(6),
        ver in arb_version(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = VersionedStore::with_defaults(MemoryEngine::new());
            let ctx = RequestContext::new();
            let other_ver = format!("{ver}-other");

            store
                .insert_many_values(&ctx, CATALOG_COLLECTION, &ver, &items)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            store
                .insert_many_values(&ctx, CATALOG_COLLECTION, &other_ver, &other)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            let all: HashMap<String, CatalogItem> = store
                .get_all_values(&ctx, CATALOG_COLLECTION, &ver)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let expected: HashMap<String, CatalogItem> = items.into_iter().collect();
            prop_assert_eq!(all, expected);
            Ok(())
        })?;
    }

    /// Missing ids reported by GetManyByIds are exactly the requested ids
    /// that were never written.
    #[test]
    fn prop_get_many_missing_ids_are_exact(
        items in arb_catalog(8),
        extra in prop::collection::vec("[a-z]{9,12}", 0..4),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = VersionedStore::with_defaults(MemoryEngine::new());
            let ctx = RequestContext::new();
            store
                .insert_many_values(&ctx, CATALOG_COLLECTION, CATALOG_VERSION, &items)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            let mut requested: Vec<String> = items.keys().cloned().collect();
            requested.extend(extra.iter().cloned());
            let mut found: HashMap<String, CatalogItem> = HashMap::new();
            let result = store
                .get_many_by_ids(
                    &ctx,
                    CATALOG_COLLECTION,
                    &requested,
                    CATALOG_VERSION,
                    &mut Keyed::new(&mut found),
                )
                .await;

            let mut expected_missing: Vec<String> = Vec::new();
            for id in &extra {
                if !expected_missing.contains(id) {
                    expected_missing.push(id.clone());
                }
            }
            match result {
                Ok(()) => prop_assert!(expected_missing.is_empty()),
                Err(e) => {
                    prop_assert!(e.is_not_found());
                    prop_assert_eq!(e.not_found_ids(), expected_missing.as_slice());
                }
            }
            prop_assert_eq!(found.len(), items.len());
            Ok(())
        })?;
    }
}

/// One single-record write against the catalog.
#[derive(Debug, Clone)]
enum Write {
    Insert(CatalogItem),
    Update(CatalogItem),
    InsertOrUpdate(CatalogItem),
    Remove,
}

const WRITE_KEYS: [&str; 2] = ["a", "b"];

fn arb_write() -> impl Strategy<Value = (String, Write)> {
    let key = prop::sample::select(WRITE_KEYS.to_vec()).prop_map(|key| key.to_string());
    let write = prop_oneof![
        arb_catalog_item().prop_map(Write::Insert),
        arb_catalog_item().prop_map(Write::Update),
        arb_catalog_item().prop_map(Write::InsertOrUpdate),
        Just(Write::Remove),
    ];
    (key, write)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Replaying any sequence of writes leaves the store where applying the
    /// same writes to a map leaves the map, and every write fails exactly
    /// when the map says it should.
    #[test]
    fn prop_write_sequence_matches_model(
        writes in prop::collection::vec(arb_write(), 0..24),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = VersionedStore::with_defaults(MemoryEngine::new());
            let ctx = RequestContext::new();
            let mut model: HashMap<String, CatalogItem> = HashMap::new();

            for (id, write) in writes {
                let (result, expected) = match write {
                    Write::Insert(item) => {
                        let result = store
                            .insert_value(&ctx, CATALOG_COLLECTION, &id, CATALOG_VERSION, &item)
                            .await;
                        let expected = if model.contains_key(&id) {
                            Some(ErrorKind::Other)
                        } else {
                            model.insert(id.clone(), item);
                            None
                        };
                        (result, expected)
                    }
                    Write::Update(item) => {
                        let result = store
                            .update_value(&ctx, CATALOG_COLLECTION, &id, CATALOG_VERSION, &item)
                            .await;
                        let expected = match model.get_mut(&id) {
                            Some(slot) => {
                                *slot = item;
                                None
                            }
                            None => Some(ErrorKind::NotFound),
                        };
                        (result, expected)
                    }
                    Write::InsertOrUpdate(item) => {
                        let result = store
                            .insert_or_update_value(
                                &ctx,
                                CATALOG_COLLECTION,
                                &id,
                                CATALOG_VERSION,
                                &item,
                            )
                            .await;
                        model.insert(id.clone(), item);
                        (result, None)
                    }
                    Write::Remove => {
                        let result = store
                            .remove(&ctx, CATALOG_COLLECTION, &id, CATALOG_VERSION)
                            .await;
                        let expected = match model.remove(&id) {
                            Some(_) => None,
                            None => Some(ErrorKind::NotFound),
                        };
                        (result, expected)
                    }
                };
                prop_assert_eq!(result.err().map(|e| e.kind()), expected);
            }

            for id in WRITE_KEYS {
                let got = store
                    .get::<CatalogItem>(&ctx, CATALOG_COLLECTION, id, CATALOG_VERSION)
                    .await;
                match model.get(id) {
                    Some(item) => {
                        let got = got.ok();
                        prop_assert_eq!(got.as_ref(), Some(item))
                    }
                    None => prop_assert!(matches!(got, Err(ref e) if e.is_not_found())),
                }
            }
            let all: HashMap<String, CatalogItem> = store
                .get_all_values(&ctx, CATALOG_COLLECTION, CATALOG_VERSION)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(all, model);
            Ok(())
        })?;
    }
}
