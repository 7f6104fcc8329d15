//! Getter and setter capability traits.
//!
//! Both traits are object safe so that handles can be shared as
//! `Arc<dyn CacheGetter>` / `Arc<dyn CacheSetter>` and wrapped by
//! middleware. Typed convenience methods live on the blanket
//! [`CacheGetterExt`] and [`CacheSetterExt`] extension traits.
//!
//! Every data-bearing operation takes an explicit version tag. The reserved
//! tag [`LATEST_VERSION`](vercache_core::LATEST_VERSION) is resolved through
//! the version registry once per call.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use vercache_core::{
    CacheResult, CacheVersion, CodecError, DestinationShape, Envelope, Payload, RequestContext,
};

use crate::codec::{decode, encode, Destination, Keyed, Sequence};

/// Read capability set.
#[async_trait]
pub trait CacheGetter: Send + Sync {
    /// Point lookup of `(id, ver)` into a single-value destination.
    async fn get_by_id(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        dest: &mut dyn Destination,
    ) -> CacheResult<()>;

    /// Bulk lookup into a keyed destination.
    ///
    /// Found records are written even when the call fails with a not-found
    /// error listing the missing ids. An empty `ids` slice is a no-op.
    async fn get_many_by_ids(
        &self,
        ctx: &RequestContext,
        collection: &str,
        ids: &[String],
        ver: &str,
        dest: &mut dyn Destination,
    ) -> CacheResult<()>;

    /// Every record of a version into a keyed destination. An empty
    /// version is not a not-found condition.
    async fn get_all(
        &self,
        ctx: &RequestContext,
        collection: &str,
        ver: &str,
        dest: &mut dyn Destination,
    ) -> CacheResult<()>;

    /// Every envelope sharing `(id, ver)` into a sequence destination.
    async fn get_array_by_single_id(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        dest: &mut dyn Destination,
    ) -> CacheResult<()>;

    /// All registry entries, in engine order.
    async fn get_latest_versions(&self, ctx: &RequestContext) -> CacheResult<Vec<CacheVersion>>;

    /// Registry entry for one collection.
    async fn get_latest_collection_version(
        &self,
        ctx: &RequestContext,
        collection: &str,
    ) -> CacheResult<CacheVersion>;
}

/// Write capability set, including the record lock protocol.
#[async_trait]
pub trait CacheSetter: Send + Sync {
    async fn insert(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        item: Payload,
    ) -> CacheResult<()>;

    /// Best-effort bulk insert: a failure part way through leaves the
    /// records written before it in place.
    async fn insert_many(
        &self,
        ctx: &RequestContext,
        collection: &str,
        ver: &str,
        items: BTreeMap<String, Payload>,
    ) -> CacheResult<()>;

    /// Update when `(id, ver)` exists, insert otherwise. Not atomic against
    /// a concurrent writer on the same key.
    async fn insert_or_update(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        item: Payload,
    ) -> CacheResult<()>;

    /// Replace the whole envelope, clearing any lock.
    async fn update(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        item: Payload,
    ) -> CacheResult<()>;

    async fn remove(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
    ) -> CacheResult<()>;

    /// Delete every envelope of `ver`; other versions are untouched.
    async fn remove_all(&self, ctx: &RequestContext, collection: &str, ver: &str)
        -> CacheResult<()>;

    /// Wait until the caller holds the record lock, then decode the record.
    async fn get_and_lock_by_id(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        dest: &mut dyn Destination,
    ) -> CacheResult<()>;

    /// Clear the record lock if the caller holds it.
    async fn release_locked_by_id(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
    ) -> CacheResult<()>;
}

/// Single-value destination that tracks whether it was filled apart from
/// the decoded value, so a record whose payload is `null` still reads back.
struct Filled<T> {
    value: Option<T>,
}

impl<T> Filled<T> {
    fn new() -> Self {
        Self { value: None }
    }

    fn into_value(self) -> Result<T, CodecError> {
        self.value.ok_or_else(|| CodecError::Deserialize {
            target: std::any::type_name::<T>(),
            reason: "no record was decoded".to_string(),
        })
    }
}

impl<T: DeserializeOwned + Send> Destination for Filled<T> {
    fn shape(&self) -> DestinationShape {
        DestinationShape::Single
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn fill(&mut self, envelopes: &[Envelope]) -> Result<(), CodecError> {
        if let Some(envelope) = envelopes.last() {
            self.value = Some(decode(&envelope.data)?);
        }
        Ok(())
    }
}

/// Typed reads over any [`CacheGetter`].
#[async_trait]
pub trait CacheGetterExt: CacheGetter {
    async fn get<T>(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
    ) -> CacheResult<T>
    where
        T: DeserializeOwned + Send,
    {
        let mut slot = Filled::new();
        self.get_by_id(ctx, collection, id, ver, &mut slot).await?;
        Ok(slot.into_value()?)
    }

    async fn get_many<T>(
        &self,
        ctx: &RequestContext,
        collection: &str,
        ids: &[String],
        ver: &str,
    ) -> CacheResult<HashMap<String, T>>
    where
        T: DeserializeOwned + Send,
    {
        let mut map = HashMap::new();
        self.get_many_by_ids(ctx, collection, ids, ver, &mut Keyed::new(&mut map))
            .await?;
        Ok(map)
    }

    async fn get_all_values<T>(
        &self,
        ctx: &RequestContext,
        collection: &str,
        ver: &str,
    ) -> CacheResult<HashMap<String, T>>
    where
        T: DeserializeOwned + Send,
    {
        let mut map = HashMap::new();
        self.get_all(ctx, collection, ver, &mut Keyed::new(&mut map))
            .await?;
        Ok(map)
    }

    async fn get_array<T>(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
    ) -> CacheResult<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let mut items = Vec::new();
        self.get_array_by_single_id(ctx, collection, id, ver, &mut Sequence::new(&mut items))
            .await?;
        Ok(items)
    }
}

impl<G: CacheGetter + ?Sized> CacheGetterExt for G {}

/// Typed writes and locked reads over any [`CacheSetter`].
#[async_trait]
pub trait CacheSetterExt: CacheSetter {
    async fn insert_value<T>(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        value: &T,
    ) -> CacheResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let item = encode(value)?;
        self.insert(ctx, collection, id, ver, item).await
    }

    async fn insert_many_values<T>(
        &self,
        ctx: &RequestContext,
        collection: &str,
        ver: &str,
        values: &BTreeMap<String, T>,
    ) -> CacheResult<()>
    where
        T: Serialize + Sync,
    {
        let mut items = BTreeMap::new();
        for (id, value) in values {
            items.insert(id.clone(), encode(value)?);
        }
        self.insert_many(ctx, collection, ver, items).await
    }

    async fn insert_or_update_value<T>(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        value: &T,
    ) -> CacheResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let item = encode(value)?;
        self.insert_or_update(ctx, collection, id, ver, item).await
    }

    async fn update_value<T>(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        value: &T,
    ) -> CacheResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let item = encode(value)?;
        self.update(ctx, collection, id, ver, item).await
    }

    async fn get_and_lock<T>(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
    ) -> CacheResult<T>
    where
        T: DeserializeOwned + Send,
    {
        let mut slot = Filled::new();
        self.get_and_lock_by_id(ctx, collection, id, ver, &mut slot)
            .await?;
        Ok(slot.into_value()?)
    }
}

impl<S: CacheSetter + ?Sized> CacheSetterExt for S {}
