//! Versioned store.
//!
//! [`VersionedStore`] implements both capability sets over any
//! [`DocumentEngine`]. Envelopes are keyed by `(collection, id, ver)`; the
//! reserved tag [`LATEST_VERSION`] is resolved through the version registry
//! once per call. Resolution is a plain read: a concurrent registry update
//! may or may not be observed by a call already in flight.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use vercache_core::{
    CacheResult, CacheStorageConfig, CacheStorageError, CacheVersion, DestinationShape, DocKey,
    Envelope, Operation, Payload, RequestContext, LATEST_VERSION,
};

use crate::codec::{decode, Destination};
use crate::engine::{DocumentEngine, Filter};
use crate::lock::LockCoordinator;
use crate::traits::{CacheGetter, CacheSetter};

/// Getter and setter over a document engine.
///
/// # Example
///
/// ```ignore
/// let store = VersionedStore::new(MemoryEngine::new(), CacheStorageConfig::default())?;
/// let (getter, setter) = store.client();
/// setter.insert_value(&ctx, "catalog", "1", "1", &item).await?;
/// let item: CatalogItem = getter.get(&ctx, "catalog", "1", "latest").await?;
/// ```
pub struct VersionedStore<E: DocumentEngine> {
    engine: Arc<E>,
    config: CacheStorageConfig,
    locks: LockCoordinator,
}

impl<E: DocumentEngine> VersionedStore<E> {
    /// Create a store owning `engine`.
    ///
    /// # Errors
    ///
    /// Returns a config error if `config` fails validation.
    pub fn new(engine: E, config: CacheStorageConfig) -> CacheResult<Self> {
        Self::from_shared(Arc::new(engine), config)
    }

    /// Create a store over an engine shared with other handles.
    pub fn from_shared(engine: Arc<E>, config: CacheStorageConfig) -> CacheResult<Self> {
        config.validate()?;
        let locks = LockCoordinator::from_config(&config);
        Ok(Self {
            engine,
            config,
            locks,
        })
    }

    /// Create a store with the default configuration.
    pub fn with_defaults(engine: E) -> Self {
        let config = CacheStorageConfig::default();
        Self {
            engine: Arc::new(engine),
            locks: LockCoordinator::from_config(&config),
            config,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &CacheStorageConfig {
        &self.config
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn check_shape(
        operation: Operation,
        dest: &dyn Destination,
        expected: DestinationShape,
    ) -> CacheResult<()> {
        let actual = dest.shape();
        if actual == expected {
            return Ok(());
        }
        Err(CacheStorageError::InvalidDestinationType {
            operation,
            expected,
            actual,
            type_name: dest.type_name(),
        })
    }

    fn ensure_live(ctx: &RequestContext, operation: Operation, target: &str) -> CacheResult<()> {
        if ctx.is_cancelled() {
            return Err(CacheStorageError::Cancelled);
        }
        if ctx.is_expired() {
            return Err(CacheStorageError::DeadlineExceeded {
                operation,
                target: target.to_string(),
            });
        }
        Ok(())
    }

    fn registry_key(&self, collection: &str) -> DocKey {
        DocKey::new(
            self.config.registry_collection.as_str(),
            collection,
            self.config.registry_version.as_str(),
        )
    }

    async fn lookup_version(&self, collection: &str) -> CacheResult<CacheVersion> {
        let key = self.registry_key(collection);
        let envelope = self.engine.find_one(&key).await?.ok_or_else(|| {
            CacheStorageError::VersionNotRegistered {
                collection: collection.to_string(),
            }
        })?;
        Ok(decode(&envelope.data)?)
    }

    /// Concrete version for `ver`, consulting the registry for `"latest"`.
    async fn resolve_version(&self, collection: &str, ver: &str) -> CacheResult<String> {
        if ver != LATEST_VERSION {
            return Ok(ver.to_string());
        }
        let resolved = self.lookup_version(collection).await?.version;
        tracing::debug!(collection, resolved = %resolved, "Resolved latest version");
        Ok(resolved)
    }
}

impl<E: DocumentEngine + 'static> VersionedStore<E> {
    /// Getter and setter handles sharing this store's engine.
    pub fn client(&self) -> (Arc<dyn CacheGetter>, Arc<dyn CacheSetter>) {
        let store = Arc::new(self.clone());
        let getter: Arc<dyn CacheGetter> = store.clone();
        (getter, store)
    }
}

impl<E: DocumentEngine> Clone for VersionedStore<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            config: self.config.clone(),
            locks: self.locks,
        }
    }
}

/// Distinct ids in first-seen order.
fn distinct(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

// =============================================================================
// GETTER
// =============================================================================

#[async_trait]
impl<E: DocumentEngine> CacheGetter for VersionedStore<E> {
    async fn get_by_id(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        dest: &mut dyn Destination,
    ) -> CacheResult<()> {
        Self::check_shape(Operation::GetById, dest, DestinationShape::Single)?;
        Self::ensure_live(ctx, Operation::GetById, collection)?;
        let ver = self.resolve_version(collection, ver).await?;

        let key = DocKey::new(collection, id, ver.as_str());
        let envelope = self
            .engine
            .find_one(&key)
            .await?
            .ok_or_else(|| CacheStorageError::missing(collection, id, &ver))?;
        dest.fill(std::slice::from_ref(&envelope))?;
        Ok(())
    }

    async fn get_many_by_ids(
        &self,
        ctx: &RequestContext,
        collection: &str,
        ids: &[String],
        ver: &str,
        dest: &mut dyn Destination,
    ) -> CacheResult<()> {
        Self::check_shape(Operation::GetManyByIds, dest, DestinationShape::Keyed)?;
        if ids.is_empty() {
            return Ok(());
        }
        Self::ensure_live(ctx, Operation::GetManyByIds, collection)?;
        let ver = self.resolve_version(collection, ver).await?;

        let requested = distinct(ids);
        let found = self
            .engine
            .find(collection, &Filter::ids(ver.as_str(), requested.clone()))
            .await?;
        dest.fill(&found)?;

        let found_ids: HashSet<&str> = found.iter().map(|envelope| envelope.id.as_str()).collect();
        let missing_ids: Vec<String> = requested
            .iter()
            .filter(|id| !found_ids.contains(id.as_str()))
            .cloned()
            .collect();
        if missing_ids.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            collection,
            ver = %ver,
            requested = requested.len(),
            missing = missing_ids.len(),
            "Bulk read incomplete"
        );
        Err(CacheStorageError::ManyNotFound {
            collection: collection.to_string(),
            ver,
            requested: requested.len(),
            missing_ids,
        })
    }

    async fn get_all(
        &self,
        ctx: &RequestContext,
        collection: &str,
        ver: &str,
        dest: &mut dyn Destination,
    ) -> CacheResult<()> {
        Self::check_shape(Operation::GetAll, dest, DestinationShape::Keyed)?;
        Self::ensure_live(ctx, Operation::GetAll, collection)?;
        let ver = self.resolve_version(collection, ver).await?;

        let found = self
            .engine
            .find(collection, &Filter::version(ver))
            .await?;
        dest.fill(&found)?;
        Ok(())
    }

    async fn get_array_by_single_id(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        dest: &mut dyn Destination,
    ) -> CacheResult<()> {
        Self::check_shape(Operation::GetArrayBySingleId, dest, DestinationShape::Sequence)?;
        Self::ensure_live(ctx, Operation::GetArrayBySingleId, collection)?;
        let ver = self.resolve_version(collection, ver).await?;

        let found = self
            .engine
            .find(collection, &Filter::ids(ver.as_str(), vec![id.to_string()]))
            .await?;
        if found.is_empty() {
            return Err(CacheStorageError::missing(collection, id, &ver));
        }
        dest.fill(&found)?;
        Ok(())
    }

    async fn get_latest_versions(&self, ctx: &RequestContext) -> CacheResult<Vec<CacheVersion>> {
        let registry = self.config.registry_collection.as_str();
        Self::ensure_live(ctx, Operation::GetLatestVersions, registry)?;

        let entries = self
            .engine
            .find(registry, &Filter::version(self.config.registry_version.as_str()))
            .await?;
        let versions = entries
            .iter()
            .map(|envelope| decode::<CacheVersion>(&envelope.data))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(versions)
    }

    async fn get_latest_collection_version(
        &self,
        ctx: &RequestContext,
        collection: &str,
    ) -> CacheResult<CacheVersion> {
        Self::ensure_live(ctx, Operation::GetLatestCollectionVersion, collection)?;
        self.lookup_version(collection).await
    }
}

// =============================================================================
// SETTER
// =============================================================================

#[async_trait]
impl<E: DocumentEngine> CacheSetter for VersionedStore<E> {
    async fn insert(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        item: Payload,
    ) -> CacheResult<()> {
        Self::ensure_live(ctx, Operation::Insert, collection)?;
        let ver = self.resolve_version(collection, ver).await?;

        self.engine
            .insert_one(collection, Envelope::new(id, ver, item))
            .await?;
        Ok(())
    }

    async fn insert_many(
        &self,
        ctx: &RequestContext,
        collection: &str,
        ver: &str,
        items: BTreeMap<String, Payload>,
    ) -> CacheResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        Self::ensure_live(ctx, Operation::InsertMany, collection)?;
        let ver = self.resolve_version(collection, ver).await?;

        let envelopes: Vec<Envelope> = items
            .into_iter()
            .map(|(id, item)| Envelope::new(id, ver.as_str(), item))
            .collect();
        let count = envelopes.len();
        self.engine.insert_many(collection, envelopes).await?;
        tracing::debug!(collection, ver = %ver, count, "Inserted envelopes");
        Ok(())
    }

    async fn insert_or_update(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        item: Payload,
    ) -> CacheResult<()> {
        Self::ensure_live(ctx, Operation::InsertOrUpdate, collection)?;
        let ver = self.resolve_version(collection, ver).await?;

        let envelope = Envelope::new(id, ver, item);
        if self.engine.replace_one(collection, envelope.clone()).await? {
            return Ok(());
        }
        self.engine.insert_one(collection, envelope).await?;
        Ok(())
    }

    async fn update(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        item: Payload,
    ) -> CacheResult<()> {
        Self::ensure_live(ctx, Operation::Update, collection)?;
        let ver = self.resolve_version(collection, ver).await?;

        let envelope = Envelope::new(id, ver.as_str(), item);
        if self.engine.replace_one(collection, envelope).await? {
            Ok(())
        } else {
            Err(CacheStorageError::missing(collection, id, &ver))
        }
    }

    async fn remove(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
    ) -> CacheResult<()> {
        Self::ensure_live(ctx, Operation::Remove, collection)?;
        let ver = self.resolve_version(collection, ver).await?;

        if self
            .engine
            .delete_one(&DocKey::new(collection, id, ver.as_str()))
            .await?
        {
            Ok(())
        } else {
            Err(CacheStorageError::missing(collection, id, &ver))
        }
    }

    async fn remove_all(
        &self,
        ctx: &RequestContext,
        collection: &str,
        ver: &str,
    ) -> CacheResult<()> {
        Self::ensure_live(ctx, Operation::RemoveAll, collection)?;
        let ver = self.resolve_version(collection, ver).await?;

        let deleted = self
            .engine
            .delete_many(collection, &Filter::version(ver.as_str()))
            .await?;
        tracing::debug!(collection, ver = %ver, deleted, "Removed version");
        Ok(())
    }

    async fn get_and_lock_by_id(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        dest: &mut dyn Destination,
    ) -> CacheResult<()> {
        Self::check_shape(Operation::GetAndLockById, dest, DestinationShape::Single)?;
        Self::ensure_live(ctx, Operation::GetAndLockById, collection)?;
        let ver = self.resolve_version(collection, ver).await?;

        let key = DocKey::new(collection, id, ver);
        let envelope = self.locks.acquire(self.engine.as_ref(), ctx, &key).await?;
        dest.fill(std::slice::from_ref(&envelope))?;
        Ok(())
    }

    async fn release_locked_by_id(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
    ) -> CacheResult<()> {
        Self::ensure_live(ctx, Operation::ReleaseLockedById, collection)?;
        let ver = self.resolve_version(collection, ver).await?;

        let key = DocKey::new(collection, id, ver);
        self.locks.release(self.engine.as_ref(), ctx, &key).await
    }
}

// =============================================================================
// TESTS
// =============================================================================
