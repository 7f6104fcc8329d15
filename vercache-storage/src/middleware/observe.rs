//! Observation middleware.
//!
//! [`ObservationLayer`] wraps a getter or setter so that every call opens one
//! tracing span tagged with database and operation metadata, and reports one
//! [`Observation`] to an [`ObservationSink`] when the call ends.
//!
//! # Span fields
//!
//! | Field | Value |
//! |---|---|
//! | `otel.name`, `db.statement` | `"<db_type>.driver/<Operation>"` |
//! | `db.type` | configured database type |
//! | `db.instance`, `db.user` | configured host and user, when set |
//! | `component` | configured service name |
//! | `cache.collection`, `cache.ver` | call arguments, when the operation has them |
//! | `id`, `ids`, `item`, `items` | call arguments, when the operation has them |
//! | `found` | `true` on success, `false` on a not-found failure |
//!
//! Not-found is a normal outcome and is never logged as an error. Any other
//! failure is logged with `tracing::error!` inside the span. The layer never
//! alters arguments, results or errors.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::field::{debug, display, Empty};
use tracing::{Instrument, Span};
use vercache_core::{
    CacheResult, CacheStorageConfig, CacheVersion, Operation, Payload, RequestContext,
};

use super::{GetterMiddleware, SetterMiddleware};
use crate::codec::Destination;
use crate::engine::DocumentEngine;
use crate::traits::{CacheGetter, CacheSetter};

/// Database type used in operation names unless configured otherwise.
pub const DEFAULT_DB_TYPE: &str = "mongodb";

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Static tags attached to every span a layer opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverConfig {
    /// Reported as `component`.
    pub service_name: String,
    /// Reported as `db.type` and used as the operation name prefix.
    pub db_type: String,
    /// Reported as `db.instance`.
    pub db_host: Option<String>,
    /// Reported as `db.user`.
    pub db_user: Option<String>,
}

impl ObserverConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            db_type: DEFAULT_DB_TYPE.to_string(),
            db_host: None,
            db_user: None,
        }
    }

    /// Observer tags for a store built from `config`; `db.instance` is the
    /// configured cache host.
    pub fn from_cache_config(service_name: impl Into<String>, config: &CacheStorageConfig) -> Self {
        Self {
            db_host: config.cache_host.clone(),
            ..Self::new(service_name)
        }
    }

    /// Observer tags naming `engine` as the database type.
    pub fn for_engine<E>(service_name: impl Into<String>, engine: &E) -> Self
    where
        E: DocumentEngine + ?Sized,
    {
        Self::new(service_name).with_db_type(engine.name())
    }

    pub fn with_db_type(mut self, db_type: impl Into<String>) -> Self {
        self.db_type = db_type.into();
        self
    }

    pub fn with_db_host(mut self, host: impl Into<String>) -> Self {
        self.db_host = Some(host.into());
        self
    }

    pub fn with_db_user(mut self, user: impl Into<String>) -> Self {
        self.db_user = Some(user.into());
        self
    }

    /// Span and observation name for `operation`.
    pub fn operation_name(&self, operation: Operation) -> String {
        format!("{}.driver/{}", self.db_type, operation)
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self::new("vercache")
    }
}

// ============================================================================
// OBSERVATIONS
// ============================================================================

/// Per-call arguments recorded on the span. Absent fields are not recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationTags {
    pub collection: Option<String>,
    pub ver: Option<String>,
    pub id: Option<String>,
    pub ids: Option<Vec<String>>,
    pub item: Option<Payload>,
    pub items: Option<BTreeMap<String, Payload>>,
}

impl OperationTags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(mut self, collection: &str) -> Self {
        self.collection = Some(collection.to_string());
        self
    }

    pub fn ver(mut self, ver: &str) -> Self {
        self.ver = Some(ver.to_string());
        self
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn ids(mut self, ids: &[String]) -> Self {
        self.ids = Some(ids.to_vec());
        self
    }

    pub fn item(mut self, item: &Payload) -> Self {
        self.item = Some(item.clone());
        self
    }

    pub fn items(mut self, items: &BTreeMap<String, Payload>) -> Self {
        self.items = Some(items.clone());
        self
    }

    fn record_on(&self, span: &Span) {
        if let Some(collection) = &self.collection {
            span.record("cache.collection", collection.as_str());
        }
        if let Some(ver) = &self.ver {
            span.record("cache.ver", ver.as_str());
        }
        if let Some(id) = &self.id {
            span.record("id", id.as_str());
        }
        if let Some(ids) = &self.ids {
            span.record("ids", debug(ids));
        }
        if let Some(item) = &self.item {
            span.record("item", display(item));
        }
        if let Some(items) = &self.items {
            span.record("items", debug(items));
        }
    }
}

/// How a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    NotFound,
    Error,
}

impl Outcome {
    pub fn of<T>(result: &CacheResult<T>) -> Self {
        match result {
            Ok(_) => Outcome::Success,
            Err(e) if e.is_not_found() => Outcome::NotFound,
            Err(_) => Outcome::Error,
        }
    }

    /// Value of the `found` tag, if the outcome sets one.
    pub fn found(&self) -> Option<bool> {
        match self {
            Outcome::Success => Some(true),
            Outcome::NotFound => Some(false),
            Outcome::Error => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Success => "success",
            Outcome::NotFound => "not_found",
            Outcome::Error => "error",
        };
        f.write_str(s)
    }
}

/// One completed (or abandoned) call.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Name of the layer that observed the call.
    pub layer: String,
    pub operation: Operation,
    /// Full operation name, e.g. `mongodb.driver/GetById`.
    pub name: String,
    pub tags: OperationTags,
    pub outcome: Outcome,
    /// Error message for `Outcome::Error`.
    pub error: Option<String>,
    pub elapsed: Duration,
}

/// Receives one observation per call.
pub trait ObservationSink: Send + Sync {
    fn record(&self, observation: Observation);
}

/// Emits each observation as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ObservationSink for TracingSink {
    fn record(&self, observation: Observation) {
        tracing::debug!(
            layer = %observation.layer,
            operation = %observation.name,
            outcome = %observation.outcome,
            elapsed_ms = observation.elapsed.as_millis() as u64,
            "Cache operation observed"
        );
    }
}

/// Discards observations; spans are still opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ObservationSink for NoopSink {
    fn record(&self, _observation: Observation) {}
}

// ============================================================================
// LAYER
// ============================================================================

/// Middleware producing [`ObservedGetter`] / [`ObservedSetter`] wrappers.
#[derive(Clone)]
pub struct ObservationLayer {
    name: String,
    config: Arc<ObserverConfig>,
    sink: Arc<dyn ObservationSink>,
}

impl ObservationLayer {
    /// Create a layer reporting to a [`TracingSink`].
    pub fn new(name: impl Into<String>, config: ObserverConfig) -> Self {
        Self {
            name: name.into(),
            config: Arc::new(config),
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ObservationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    /// Run `call` inside a new observation scope.
    async fn observe<T, F>(&self, operation: Operation, tags: OperationTags, call: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        let scope = ObservationScope::open(self, operation, tags);
        let result = call.instrument(scope.span().clone()).await;
        scope.finish(&result);
        result
    }
}

impl fmt::Debug for ObservationLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationLayer")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GetterMiddleware for ObservationLayer {
    fn wrap(&self, inner: Arc<dyn CacheGetter>) -> Arc<dyn CacheGetter> {
        Arc::new(ObservedGetter::new(inner, self.clone()))
    }
}

impl SetterMiddleware for ObservationLayer {
    fn wrap(&self, inner: Arc<dyn CacheSetter>) -> Arc<dyn CacheSetter> {
        Arc::new(ObservedSetter::new(inner, self.clone()))
    }
}

// ============================================================================
// SCOPE
// ============================================================================

struct Pending {
    layer: ObservationLayer,
    operation: Operation,
    name: String,
    tags: OperationTags,
    started: Instant,
}

/// Span plus pending observation for one call.
///
/// The observation is reported by [`finish`](Self::finish), or on drop if
/// the call never completed (panic or dropped future).
pub struct ObservationScope {
    span: Span,
    pending: Option<Pending>,
}

impl ObservationScope {
    pub fn open(layer: &ObservationLayer, operation: Operation, tags: OperationTags) -> Self {
        let config = layer.config();
        let name = config.operation_name(operation);
        let span = tracing::info_span!(
            "cache_operation",
            otel.name = %name,
            db.type = %config.db_type,
            db.instance = Empty,
            db.user = Empty,
            db.statement = %name,
            component = %config.service_name,
            cache.collection = Empty,
            cache.ver = Empty,
            id = Empty,
            ids = Empty,
            item = Empty,
            items = Empty,
            found = Empty,
        );
        if let Some(host) = &config.db_host {
            span.record("db.instance", host.as_str());
        }
        if let Some(user) = &config.db_user {
            span.record("db.user", user.as_str());
        }
        tags.record_on(&span);

        Self {
            span,
            pending: Some(Pending {
                layer: layer.clone(),
                operation,
                name,
                tags,
                started: Instant::now(),
            }),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Close the scope with the call's result.
    pub fn finish<T>(mut self, result: &CacheResult<T>) {
        let outcome = Outcome::of(result);
        if let Some(found) = outcome.found() {
            self.span.record("found", found);
        }
        let error = match result {
            Err(e) if outcome == Outcome::Error => {
                tracing::error!(parent: &self.span, error = %e, "Cache operation failed");
                Some(e.to_string())
            }
            _ => None,
        };
        self.report(outcome, error);
    }

    fn report(&mut self, outcome: Outcome, error: Option<String>) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        pending.layer.sink.record(Observation {
            layer: pending.layer.name.clone(),
            operation: pending.operation,
            name: pending.name,
            tags: pending.tags,
            outcome,
            error,
            elapsed: pending.started.elapsed(),
        });
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        if self.pending.is_none() {
            return;
        }
        let detail = if std::thread::panicking() {
            "panicked"
        } else {
            "dropped before completion"
        };
        tracing::error!(parent: &self.span, error = detail, "Cache operation did not complete");
        self.report(Outcome::Error, Some(detail.to_string()));
    }
}

// ============================================================================
// OBSERVED GETTER
// ============================================================================

/// Getter wrapper opening one observation scope per call.
pub struct ObservedGetter {
    inner: Arc<dyn CacheGetter>,
    layer: ObservationLayer,
}

impl ObservedGetter {
    pub fn new(inner: Arc<dyn CacheGetter>, layer: ObservationLayer) -> Self {
        Self { inner, layer }
    }
}

#[async_trait]
impl CacheGetter for ObservedGetter {
    async fn get_by_id(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        dest: &mut dyn Destination,
    ) -> CacheResult<()> {
        let tags = OperationTags::new().collection(collection).ver(ver).id(id);
        self.layer
            .observe(
                Operation::GetById,
                tags,
                self.inner.get_by_id(ctx, collection, id, ver, dest),
            )
            .await
    }

    async fn get_many_by_ids(
        &self,
        ctx: &RequestContext,
        collection: &str,
        ids: &[String],
        ver: &str,
        dest: &mut dyn Destination,
    ) -> CacheResult<()> {
        let tags = OperationTags::new().collection(collection).ver(ver).ids(ids);
        self.layer
            .observe(
                Operation::GetManyByIds,
                tags,
                self.inner.get_many_by_ids(ctx, collection, ids, ver, dest),
            )
            .await
    }

    async fn get_all(
        &self,
        ctx: &RequestContext,
        collection: &str,
        ver: &str,
        dest: &mut dyn Destination,
    ) -> CacheResult<()> {
        let tags = OperationTags::new().collection(collection).ver(ver);
        self.layer
            .observe(
                Operation::GetAll,
                tags,
                self.inner.get_all(ctx, collection, ver, dest),
            )
            .await
    }

    async fn get_array_by_single_id(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        dest: &mut dyn Destination,
    ) -> CacheResult<()> {
        let tags = OperationTags::new().collection(collection).ver(ver).id(id);
        self.layer
            .observe(
                Operation::GetArrayBySingleId,
                tags,
                self.inner
                    .get_array_by_single_id(ctx, collection, id, ver, dest),
            )
            .await
    }

    async fn get_latest_versions(&self, ctx: &RequestContext) -> CacheResult<Vec<CacheVersion>> {
        self.layer
            .observe(
                Operation::GetLatestVersions,
                OperationTags::new(),
                self.inner.get_latest_versions(ctx),
            )
            .await
    }

    async fn get_latest_collection_version(
        &self,
        ctx: &RequestContext,
        collection: &str,
    ) -> CacheResult<CacheVersion> {
        self.layer
            .observe(
                Operation::GetLatestCollectionVersion,
                OperationTags::new().collection(collection),
                self.inner.get_latest_collection_version(ctx, collection),
            )
            .await
    }
}

// ============================================================================
// OBSERVED SETTER
// ============================================================================

/// Setter wrapper opening one observation scope per call.
pub struct ObservedSetter {
    inner: Arc<dyn CacheSetter>,
    layer: ObservationLayer,
}

impl ObservedSetter {
    pub fn new(inner: Arc<dyn CacheSetter>, layer: ObservationLayer) -> Self {
        Self { inner, layer }
    }
}

#[async_trait]
impl CacheSetter for ObservedSetter {
    async fn insert(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        item: Payload,
    ) -> CacheResult<()> {
        let tags = OperationTags::new()
            .collection(collection)
            .ver(ver)
            .id(id)
            .item(&item);
        self.layer
            .observe(
                Operation::Insert,
                tags,
                self.inner.insert(ctx, collection, id, ver, item),
            )
            .await
    }

    async fn insert_many(
        &self,
        ctx: &RequestContext,
        collection: &str,
        ver: &str,
        items: BTreeMap<String, Payload>,
    ) -> CacheResult<()> {
        let tags = OperationTags::new()
            .collection(collection)
            .ver(ver)
            .items(&items);
        self.layer
            .observe(
                Operation::InsertMany,
                tags,
                self.inner.insert_many(ctx, collection, ver, items),
            )
            .await
    }

    async fn insert_or_update(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        item: Payload,
    ) -> CacheResult<()> {
        let tags = OperationTags::new()
            .collection(collection)
            .ver(ver)
            .id(id)
            .item(&item);
        self.layer
            .observe(
                Operation::InsertOrUpdate,
                tags,
                self.inner.insert_or_update(ctx, collection, id, ver, item),
            )
            .await
    }

    async fn update(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        item: Payload,
    ) -> CacheResult<()> {
        let tags = OperationTags::new()
            .collection(collection)
            .ver(ver)
            .id(id)
            .item(&item);
        self.layer
            .observe(
                Operation::Update,
                tags,
                self.inner.update(ctx, collection, id, ver, item),
            )
            .await
    }

    async fn remove(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
    ) -> CacheResult<()> {
        let tags = OperationTags::new().collection(collection).ver(ver).id(id);
        self.layer
            .observe(
                Operation::Remove,
                tags,
                self.inner.remove(ctx, collection, id, ver),
            )
            .await
    }

    async fn remove_all(
        &self,
        ctx: &RequestContext,
        collection: &str,
        ver: &str,
    ) -> CacheResult<()> {
        let tags = OperationTags::new().collection(collection).ver(ver);
        self.layer
            .observe(
                Operation::RemoveAll,
                tags,
                self.inner.remove_all(ctx, collection, ver),
            )
            .await
    }

    async fn get_and_lock_by_id(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
        dest: &mut dyn Destination,
    ) -> CacheResult<()> {
        let tags = OperationTags::new().collection(collection).ver(ver).id(id);
        self.layer
            .observe(
                Operation::GetAndLockById,
                tags,
                self.inner.get_and_lock_by_id(ctx, collection, id, ver, dest),
            )
            .await
    }

    async fn release_locked_by_id(
        &self,
        ctx: &RequestContext,
        collection: &str,
        id: &str,
        ver: &str,
    ) -> CacheResult<()> {
        let tags = OperationTags::new().collection(collection).ver(ver).id(id);
        self.layer
            .observe(
                Operation::ReleaseLockedById,
                tags,
                self.inner.release_locked_by_id(ctx, collection, id, ver),
            )
            .await
    }
}

// =============================================================================
// TESTS
// =============================================================================
