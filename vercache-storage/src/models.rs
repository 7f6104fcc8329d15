//! Shared cached entities and their typed read facades.
//!
//! Stores and chains are published into the cache by their owning services
//! and read by everyone else. Readers always read the `"latest"` version of
//! the entity collection.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use vercache_core::{CacheResult, RequestContext, LATEST_VERSION};

use crate::traits::{CacheGetter, CacheGetterExt};

/// Collection holding [`Store`] records.
pub const STORES_COLLECTION: &str = "stores";

/// Collection holding [`Chain`] records.
pub const CHAINS_COLLECTION: &str = "chains";

/// A single store (branch) belonging to a chain.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    pub id: String,
    pub name: String,
    pub due_date_start: String,
    pub due_date_end: String,
    pub currency_id: String,
    pub language: String,
    pub company_tax_id: String,
    pub chain_id: String,
    #[serde(default)]
    pub settings: Vec<StoreSetting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSetting {
    pub setting: String,
    pub value: String,
}

/// A chain of stores.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chain {
    pub id: String,
    pub name: String,
    pub default_language: String,
    #[serde(default)]
    pub settings: Vec<ChainSetting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSetting {
    pub option_id: String,
    pub options_type: String,
    pub option_value: String,
}

/// Typed read access to [`Store`] records.
#[async_trait]
pub trait StoreGetter: Send + Sync {
    async fn get_by_id(&self, ctx: &RequestContext, id: &str) -> CacheResult<Store>;

    async fn get_many(&self, ctx: &RequestContext, ids: &[String]) -> CacheResult<Vec<Store>>;

    async fn get_all(&self, ctx: &RequestContext) -> CacheResult<Vec<Store>>;
}

/// Typed read access to [`Chain`] records.
#[async_trait]
pub trait ChainGetter: Send + Sync {
    async fn get_by_id(&self, ctx: &RequestContext, id: &str) -> CacheResult<Chain>;

    async fn get_many(&self, ctx: &RequestContext, ids: &[String]) -> CacheResult<Vec<Chain>>;

    async fn get_all(&self, ctx: &RequestContext) -> CacheResult<Vec<Chain>>;
}

/// Reads `T` records from the latest version of one collection.
pub struct CollectionReader<T> {
    getter: Arc<dyn CacheGetter>,
    collection: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CollectionReader<T>
where
    T: DeserializeOwned + Send,
{
    pub fn new(getter: Arc<dyn CacheGetter>, collection: impl Into<String>) -> Self {
        Self {
            getter,
            collection: collection.into(),
            _marker: PhantomData,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn read_one(&self, ctx: &RequestContext, id: &str) -> CacheResult<T> {
        self.getter
            .get(ctx, &self.collection, id, LATEST_VERSION)
            .await
    }

    /// Records for `ids`, in request order without duplicates.
    ///
    /// Fails with the not-found ids if any requested record is missing.
    pub async fn read_many(&self, ctx: &RequestContext, ids: &[String]) -> CacheResult<Vec<T>> {
        let mut found: HashMap<String, T> = self
            .getter
            .get_many(ctx, &self.collection, ids, LATEST_VERSION)
            .await?;
        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    /// Every record, ordered by id.
    pub async fn read_all(&self, ctx: &RequestContext) -> CacheResult<Vec<T>> {
        let found: HashMap<String, T> = self
            .getter
            .get_all_values(ctx, &self.collection, LATEST_VERSION)
            .await?;
        let mut entries: Vec<(String, T)> = found.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries.into_iter().map(|(_, value)| value).collect())
    }
}

impl CollectionReader<Store> {
    /// Reader over [`STORES_COLLECTION`].
    pub fn stores(getter: Arc<dyn CacheGetter>) -> Self {
        Self::new(getter, STORES_COLLECTION)
    }
}

impl CollectionReader<Chain> {
    /// Reader over [`CHAINS_COLLECTION`].
    pub fn chains(getter: Arc<dyn CacheGetter>) -> Self {
        Self::new(getter, CHAINS_COLLECTION)
    }
}

#[async_trait]
impl StoreGetter for CollectionReader<Store> {
    async fn get_by_id(&self, ctx: &RequestContext, id: &str) -> CacheResult<Store> {
        self.read_one(ctx, id).await
    }

    async fn get_many(&self, ctx: &RequestContext, ids: &[String]) -> CacheResult<Vec<Store>> {
        self.read_many(ctx, ids).await
    }

    async fn get_all(&self, ctx: &RequestContext) -> CacheResult<Vec<Store>> {
        self.read_all(ctx).await
    }
}

#[async_trait]
impl ChainGetter for CollectionReader<Chain> {
    async fn get_by_id(&self, ctx: &RequestContext, id: &str) -> CacheResult<Chain> {
        self.read_one(ctx, id).await
    }

    async fn get_many(&self, ctx: &RequestContext, ids: &[String]) -> CacheResult<Vec<Chain>> {
        self.read_many(ctx, ids).await
    }

    async fn get_all(&self, ctx: &RequestContext) -> CacheResult<Vec<Chain>> {
        self.read_all(ctx).await
    }
}
