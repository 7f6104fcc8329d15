//! vercache Test Utilities
//!
//! Shared test infrastructure for the vercache workspace:
//! - Catalog fixtures and registry seeding
//! - Proptest generators for ids, versions and catalog items
//! - A recording observation sink for middleware tests
//! - A fault-injecting document engine
//! - Assertions over the error classification

pub use vercache_core::{
    CacheResult, CacheStorageConfig, CacheStorageError, CacheVersion, DocKey, EngineError,
    Envelope, ErrorKind, Payload, RequestContext, LATEST_VERSION,
};
pub use vercache_storage::{
    CacheGetter, CacheGetterExt, CacheSetter, CacheSetterExt, MemoryEngine, VersionedStore,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vercache_storage::engine::{ConditionalUpdate, DocumentEngine, Filter};
use vercache_storage::middleware::{Observation, ObservationSink};

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Catalog records and registry entries used across integration tests.

    use super::*;
    use std::collections::BTreeMap;

    /// Collection holding the test catalog.
    pub const CATALOG_COLLECTION: &str = "catalog";

    /// Version tag the catalog is seeded under.
    pub const CATALOG_VERSION: &str = "1";

    /// A catalog record.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct CatalogItem {
        pub id: String,
        pub name: String,
        pub price: f64,
    }

    impl CatalogItem {
        pub fn new(id: impl Into<String>, name: impl Into<String>, price: f64) -> Self {
            Self {
                id: id.into(),
                name: name.into(),
                price,
            }
        }
    }

    /// The four seeded catalog items, ids `"1"` to `"4"`.
    pub fn catalog() -> Vec<CatalogItem> {
        vec![
            CatalogItem::new("1", "Item1", 10.20),
            CatalogItem::new("2", "Item2", 20.30),
            CatalogItem::new("3", "Item3", 30.40),
            CatalogItem::new("4", "Item4", 40.50),
        ]
    }

    /// Seeded catalog item by id.
    pub fn catalog_item(id: &str) -> Option<CatalogItem> {
        catalog().into_iter().find(|item| item.id == id)
    }

    /// Seeded registry: `stores` → 2, `storeOpeningHours` → 4,
    /// `occasions` → 7 and the catalog → its seeded version.
    pub fn registry_entries() -> Vec<CacheVersion> {
        vec![
            CacheVersion::new("stores", "2"),
            CacheVersion::new("storeOpeningHours", "4"),
            CacheVersion::new("occasions", "7"),
            CacheVersion::new(CATALOG_COLLECTION, CATALOG_VERSION),
        ]
    }

    /// Write the catalog and the registry through `setter`.
    pub async fn seed_catalog<S>(setter: &S, ctx: &RequestContext) -> CacheResult<()>
    where
        S: CacheSetter + ?Sized,
    {
        let items: BTreeMap<String, CatalogItem> = catalog()
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();
        setter
            .insert_many_values(ctx, CATALOG_COLLECTION, CATALOG_VERSION, &items)
            .await?;

        let config = CacheStorageConfig::default();
        let registry: BTreeMap<String, CacheVersion> = registry_entries()
            .into_iter()
            .map(|entry| (entry.collection_name.clone(), entry))
            .collect();
        setter
            .insert_many_values(
                ctx,
                &config.registry_collection,
                &config.registry_version,
                &registry,
            )
            .await
    }

    /// Empty store over a fresh in-memory engine.
    pub fn memory_store() -> VersionedStore<MemoryEngine> {
        VersionedStore::with_defaults(MemoryEngine::new())
    }

    /// In-memory store seeded with the catalog and registry.
    pub async fn seeded_memory_store() -> VersionedStore<MemoryEngine> {
        let store = memory_store();
        seed_catalog(&store, &RequestContext::new())
            .await
            .expect("seeding the in-memory store should succeed");
        store
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for store inputs.

    use super::fixtures::CatalogItem;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    /// Record id: short alphanumeric.
    pub fn arb_id() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9]{1,8}"
    }

    /// Concrete version tag; never the `"latest"` sentinel.
    pub fn arb_version() -> impl Strategy<Value = String> {
        "[0-9]{1,3}"
    }

    pub fn arb_catalog_item() -> impl Strategy<Value = CatalogItem> {
        (arb_id(), "[a-zA-Z ]{0,16}", 0u32..100_000u32).prop_map(|(id, name, cents)| {
            CatalogItem {
                id,
                name,
                price: f64::from(cents) / 100.0,
            }
        })
    }

    /// Catalog keyed by item id, ids consistent with the map keys.
    pub fn arb_catalog(max_len: usize) -> impl Strategy<Value = BTreeMap<String, CatalogItem>> {
        prop::collection::vec(arb_catalog_item(), 0..=max_len).prop_map(|items| {
            items
                .into_iter()
                .map(|item| (item.id.clone(), item))
                .collect()
        })
    }
}

// ============================================================================
// RECORDING SINK
// ============================================================================

/// Observation sink keeping every observation in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    observations: Mutex<Vec<Observation>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far, oldest first.
    pub fn observations(&self) -> Vec<Observation> {
        self.observations
            .lock()
            .map(|observations| observations.clone())
            .unwrap_or_default()
    }

    /// Recorded operation names, oldest first.
    pub fn names(&self) -> Vec<String> {
        self.observations()
            .into_iter()
            .map(|observation| observation.name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.observations().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut observations) = self.observations.lock() {
            observations.clear();
        }
    }
}

impl ObservationSink for RecordingSink {
    fn record(&self, observation: Observation) {
        if let Ok(mut observations) = self.observations.lock() {
            observations.push(observation);
        }
    }
}

// ============================================================================
// FAULT-INJECTING ENGINE
// ============================================================================

/// Engine wrapper that counts calls and fails on demand.
///
/// - [`fail_with`](Self::fail_with) makes every call fail until [`heal`](Self::heal)
/// - [`limit_inserts`](Self::limit_inserts) lets only the next `n` envelope
///   inserts through, then fails the rest
#[derive(Debug)]
pub struct FaultyEngine<E> {
    inner: E,
    failure: Mutex<Option<EngineError>>,
    insert_budget: Mutex<Option<usize>>,
    calls: AtomicUsize,
}

impl<E: DocumentEngine> FaultyEngine<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            failure: Mutex::new(None),
            insert_budget: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Number of engine calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_with(&self, error: EngineError) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(error);
        }
    }

    pub fn heal(&self) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = None;
        }
        if let Ok(mut budget) = self.insert_budget.lock() {
            *budget = None;
        }
    }

    pub fn limit_inserts(&self, n: usize) {
        if let Ok(mut budget) = self.insert_budget.lock() {
            *budget = Some(n);
        }
    }

    /// Count the call and return the injected failure, if any.
    fn enter(&self) -> Result<(), EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.failure.lock().map_err(|_| EngineError::LockPoisoned)?;
        match failure.as_ref() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    /// Spend one insert from the budget.
    fn take_insert(&self) -> Result<(), EngineError> {
        let mut budget = self
            .insert_budget
            .lock()
            .map_err(|_| EngineError::LockPoisoned)?;
        match budget.as_mut() {
            Some(0) => Err(EngineError::Unavailable(
                "injected insert failure".to_string(),
            )),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<E: DocumentEngine> DocumentEngine for FaultyEngine<E> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn find_one(&self, key: &DocKey) -> Result<Option<Envelope>, EngineError> {
        self.enter()?;
        self.inner.find_one(key).await
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Envelope>, EngineError> {
        self.enter()?;
        self.inner.find(collection, filter).await
    }

    async fn insert_one(&self, collection: &str, envelope: Envelope) -> Result<(), EngineError> {
        self.enter()?;
        self.take_insert()?;
        self.inner.insert_one(collection, envelope).await
    }

    async fn insert_many(
        &self,
        collection: &str,
        envelopes: Vec<Envelope>,
    ) -> Result<(), EngineError> {
        self.enter()?;
        for envelope in envelopes {
            self.take_insert()?;
            self.inner.insert_one(collection, envelope).await?;
        }
        Ok(())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, EngineError> {
        self.enter()?;
        self.inner.count(collection, filter).await
    }

    async fn replace_one(&self, collection: &str, envelope: Envelope) -> Result<bool, EngineError> {
        self.enter()?;
        self.inner.replace_one(collection, envelope).await
    }

    async fn delete_one(&self, key: &DocKey) -> Result<bool, EngineError> {
        self.enter()?;
        self.inner.delete_one(key).await
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, EngineError> {
        self.enter()?;
        self.inner.delete_many(collection, filter).await
    }

    async fn find_one_and_update(
        &self,
        key: &DocKey,
        update: &ConditionalUpdate,
    ) -> Result<Option<Envelope>, EngineError> {
        self.enter()?;
        self.inner.find_one_and_update(key, update).await
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over the error classification.

    use super::*;

    /// Assert that a CacheResult failed with a not-found error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    /// Assert that a CacheResult failed with an invalid destination type.
    #[track_caller]
    pub fn assert_invalid_destination<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(e) if e.kind() == ErrorKind::InvalidDestinationType => {}
            other => panic!("Expected InvalidDestinationType, got: {:?}", other),
        }
    }

    /// Assert that a CacheResult failed with an unclassified error.
    #[track_caller]
    pub fn assert_other<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(e) if e.kind() == ErrorKind::Other => {}
            other => panic!("Expected Other, got: {:?}", other),
        }
    }
}
