//! Versioned cache storage.
//!
//! Typed records live in named collections, each holding any number of
//! concurrently valid versions. A registry collection maps every data
//! collection to its current version so callers can read `"latest"`.
//!
//! # Architecture
//!
//! ```text
//! caller ─→ [middleware …] ─→ VersionedStore ─→ DocumentEngine
//!                                  │                 ├─ MemoryEngine
//!                                  └─ LockCoordinator └─ LmdbEngine
//! ```
//!
//! - [`CacheGetter`] / [`CacheSetter`]: object-safe capability sets
//! - [`VersionedStore`]: version resolution, destination checks, CRUD
//! - [`LockCoordinator`]: per-record advisory lock over one atomic engine update
//! - [`middleware`]: decorator composition and the observation layer

pub mod codec;
pub mod engine;
pub mod lock;
pub mod middleware;
pub mod models;
pub mod store;
pub mod telemetry;
pub mod traits;

pub use codec::{decode, encode, Destination, Keyed, Sequence, Single};
pub use engine::{ConditionalUpdate, DocumentEngine, Filter, LmdbEngine, MemoryEngine};
pub use lock::LockCoordinator;
pub use middleware::{
    compose_getter, compose_setter, GetterMiddleware, ObservationLayer, ObservationSink,
    ObserverConfig, SetterMiddleware,
};
pub use models::{Chain, ChainGetter, ChainSetting, CollectionReader, Store, StoreGetter, StoreSetting};
pub use store::VersionedStore;
pub use traits::{CacheGetter, CacheGetterExt, CacheSetter, CacheSetterExt};

pub use vercache_core::{
    CacheResult, CacheStorageConfig, CacheStorageError, CacheVersion, ErrorKind, Payload,
    RequestContext, LATEST_VERSION,
};
