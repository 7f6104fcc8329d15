//! Getter/setter middleware.
//!
//! A middleware takes a capability handle and returns another handle with
//! the same contract, adding a cross-cutting concern around every call.
//! Composition is a left fold: the first middleware wraps the base handle,
//! each following one wraps the result, so the last is outermost.
//!
//! Any `Fn(Arc<dyn CacheGetter>) -> Arc<dyn CacheGetter>` closure is a
//! [`GetterMiddleware`] (likewise for setters).

mod observe;

use std::sync::Arc;

use crate::traits::{CacheGetter, CacheSetter};

pub use observe::{
    NoopSink, Observation, ObservationLayer, ObservationScope, ObservationSink, ObservedGetter,
    ObservedSetter, ObserverConfig, OperationTags, Outcome, TracingSink, DEFAULT_DB_TYPE,
};

/// Decorates a getter handle.
pub trait GetterMiddleware: Send + Sync {
    fn wrap(&self, inner: Arc<dyn CacheGetter>) -> Arc<dyn CacheGetter>;
}

/// Decorates a setter handle.
pub trait SetterMiddleware: Send + Sync {
    fn wrap(&self, inner: Arc<dyn CacheSetter>) -> Arc<dyn CacheSetter>;
}

impl<F> GetterMiddleware for F
where
    F: Fn(Arc<dyn CacheGetter>) -> Arc<dyn CacheGetter> + Send + Sync,
{
    fn wrap(&self, inner: Arc<dyn CacheGetter>) -> Arc<dyn CacheGetter> {
        self(inner)
    }
}

impl<F> SetterMiddleware for F
where
    F: Fn(Arc<dyn CacheSetter>) -> Arc<dyn CacheSetter> + Send + Sync,
{
    fn wrap(&self, inner: Arc<dyn CacheSetter>) -> Arc<dyn CacheSetter> {
        self(inner)
    }
}

/// Apply `middlewares` to `base` in order. An empty slice returns `base`.
pub fn compose_getter(
    base: Arc<dyn CacheGetter>,
    middlewares: &[Arc<dyn GetterMiddleware>],
) -> Arc<dyn CacheGetter> {
    middlewares
        .iter()
        .fold(base, |inner, middleware| middleware.wrap(inner))
}

/// Apply `middlewares` to `base` in order. An empty slice returns `base`.
pub fn compose_setter(
    base: Arc<dyn CacheSetter>,
    middlewares: &[Arc<dyn SetterMiddleware>],
) -> Arc<dyn CacheSetter> {
    middlewares
        .iter()
        .fold(base, |inner, middleware| middleware.wrap(inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Destination;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use vercache_core::{CacheResult, CacheStorageError, CacheVersion, RequestContext};

    /// Point reads miss; registry calls answer fixed values.
    struct Base;

    #[async_trait]
    impl CacheGetter for Base {
        async fn get_by_id(
            &self,
            _ctx: &RequestContext,
            collection: &str,
            id: &str,
            ver: &str,
            _dest: &mut dyn Destination,
        ) -> CacheResult<()> {
            Err(CacheStorageError::missing(collection, id, ver))
        }

        async fn get_many_by_ids(
            &self,
            _ctx: &RequestContext,
            _collection: &str,
            _ids: &[String],
            _ver: &str,
            _dest: &mut dyn Destination,
        ) -> CacheResult<()> {
            Ok(())
        }

        async fn get_all(
            &self,
            _ctx: &RequestContext,
            _collection: &str,
            _ver: &str,
            _dest: &mut dyn Destination,
        ) -> CacheResult<()> {
            Ok(())
        }

        async fn get_array_by_single_id(
            &self,
            _ctx: &RequestContext,
            _collection: &str,
            _id: &str,
            _ver: &str,
            _dest: &mut dyn Destination,
        ) -> CacheResult<()> {
            Ok(())
        }

        async fn get_latest_versions(&self, _ctx: &RequestContext) -> CacheResult<Vec<CacheVersion>> {
            Ok(vec![CacheVersion::new("base", "1")])
        }

        async fn get_latest_collection_version(
            &self,
            _ctx: &RequestContext,
            collection: &str,
        ) -> CacheResult<CacheVersion> {
            Ok(CacheVersion::new(collection, "1"))
        }
    }

    /// Records its label on every registry listing, then delegates.
    struct Labelled {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        inner: Arc<dyn CacheGetter>,
    }

    #[async_trait]
    impl CacheGetter for Labelled {
        async fn get_by_id(
            &self,
            ctx: &RequestContext,
            collection: &str,
            id: &str,
            ver: &str,
            dest: &mut dyn Destination,
        ) -> CacheResult<()> {
            self.inner.get_by_id(ctx, collection, id, ver, dest).await
        }

        async fn get_many_by_ids(
            &self,
            ctx: &RequestContext,
            collection: &str,
            ids: &[String],
            ver: &str,
            dest: &mut dyn Destination,
        ) -> CacheResult<()> {
            self.inner.get_many_by_ids(ctx, collection, ids, ver, dest).await
        }

        async fn get_all(
            &self,
            ctx: &RequestContext,
            collection: &str,
            ver: &str,
            dest: &mut dyn Destination,
        ) -> CacheResult<()> {
            self.inner.get_all(ctx, collection, ver, dest).await
        }

        async fn get_array_by_single_id(
            &self,
            ctx: &RequestContext,
            collection: &str,
            id: &str,
            ver: &str,
            dest: &mut dyn Destination,
        ) -> CacheResult<()> {
            self.inner
                .get_array_by_single_id(ctx, collection, id, ver, dest)
                .await
        }

        async fn get_latest_versions(&self, ctx: &RequestContext) -> CacheResult<Vec<CacheVersion>> {
            self.log.lock().expect("log lock").push(self.label);
            self.inner.get_latest_versions(ctx).await
        }

        async fn get_latest_collection_version(
            &self,
            ctx: &RequestContext,
            collection: &str,
        ) -> CacheResult<CacheVersion> {
            self.inner.get_latest_collection_version(ctx, collection).await
        }
    }

    fn labelled(
        label: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn GetterMiddleware> {
        let log = Arc::clone(log);
        Arc::new(move |inner: Arc<dyn CacheGetter>| -> Arc<dyn CacheGetter> {
            Arc::new(Labelled {
                label,
                log: Arc::clone(&log),
                inner,
            })
        })
    }

    #[tokio::test]
    async fn test_empty_composition_is_identity() {
        let getter = compose_getter(Arc::new(Base), &[]);
        let versions = getter
            .get_latest_versions(&RequestContext::new())
            .await
            .expect("base call should succeed");
        assert_eq!(versions, vec![CacheVersion::new("base", "1")]);
    }

    #[tokio::test]
    async fn test_last_middleware_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let getter = compose_getter(
            Arc::new(Base),
            &[labelled("first", &log), labelled("second", &log)],
        );

        getter
            .get_latest_versions(&RequestContext::new())
            .await
            .expect("call should succeed");
        assert_eq!(*log.lock().expect("log lock"), vec!["second", "first"]);
    }

    #[tokio::test]
    async fn test_errors_pass_through_unchanged() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let getter = compose_getter(Arc::new(Base), &[labelled("only", &log)]);
        let mut slot: Option<u32> = None;

        let err = getter
            .get_by_id(
                &RequestContext::new(),
                "catalog",
                "1",
                "1",
                &mut crate::codec::Single::new(&mut slot),
            )
            .await
            .expect_err("base reports not found");
        assert_eq!(err, CacheStorageError::missing("catalog", "1", "1"));
    }
}
