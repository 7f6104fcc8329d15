//! Storage engine binding.
//!
//! The store talks to its backing engine exclusively through
//! [`DocumentEngine`]. An engine must serialise conflicting single-document
//! operations; it owes no guarantee across documents.
//!
//! The lock protocol needs exactly one atomic primitive from the engine,
//! [`DocumentEngine::find_one_and_update`]: apply a [`ConditionalUpdate`]
//! to one document and return the document's post-update state, atomically
//! with the condition check. The condition itself is evaluated by
//! [`ConditionalUpdate::apply`] so every engine enforces identical rules.

pub mod key;
pub mod lmdb;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use vercache_core::{DocKey, EngineError, Envelope, LockInfo, Timestamp};

pub use lmdb::LmdbEngine;
pub use memory::MemoryEngine;

/// Multi-document selector: every envelope of `ver`, optionally restricted
/// to a set of ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub ver: String,
    pub ids: Option<Vec<String>>,
}

impl Filter {
    /// Every envelope of `ver`.
    pub fn version(ver: impl Into<String>) -> Self {
        Self {
            ver: ver.into(),
            ids: None,
        }
    }

    /// Envelopes of `ver` whose id is in `ids`.
    pub fn ids(ver: impl Into<String>, ids: Vec<String>) -> Self {
        Self {
            ver: ver.into(),
            ids: Some(ids),
        }
    }

    pub fn matches(&self, envelope: &Envelope) -> bool {
        envelope.ver == self.ver
            && self
                .ids
                .as_ref()
                .map_or(true, |ids| ids.iter().any(|id| *id == envelope.id))
    }
}

/// Conditional update applied atomically by [`DocumentEngine::find_one_and_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalUpdate {
    /// Take the lock for `token` if it is absent, malformed, or was taken
    /// before `stale_before`.
    Acquire {
        token: String,
        now: Timestamp,
        stale_before: Timestamp,
    },
    /// Clear the lock only if `token` holds it.
    Release { token: String },
}

impl ConditionalUpdate {
    /// Apply the update to `envelope`, returning whether it changed.
    pub fn apply(&self, envelope: &mut Envelope) -> bool {
        match self {
            ConditionalUpdate::Acquire {
                token,
                now,
                stale_before,
            } => {
                let free = envelope
                    .locked
                    .as_ref()
                    .map_or(true, |lock| !lock.is_held(*stale_before));
                if free {
                    envelope.locked = Some(LockInfo::new(token.clone(), *now));
                }
                free
            }
            ConditionalUpdate::Release { token } => {
                let owned = envelope
                    .locked
                    .as_ref()
                    .is_some_and(|lock| lock.is_owned_by(token));
                if owned {
                    envelope.locked = None;
                }
                owned
            }
        }
    }
}

/// Document store contract the versioned store is built on.
#[async_trait]
pub trait DocumentEngine: Send + Sync {
    /// Short engine name, reported as `db.type` by
    /// [`ObserverConfig::for_engine`](crate::middleware::ObserverConfig::for_engine).
    fn name(&self) -> &'static str;

    /// Point lookup by key.
    async fn find_one(&self, key: &DocKey) -> Result<Option<Envelope>, EngineError>;

    /// Every envelope in `collection` matching `filter`, in engine order.
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Envelope>, EngineError>;

    /// Insert a new envelope; fails with [`EngineError::DuplicateKey`] if
    /// the key exists.
    async fn insert_one(&self, collection: &str, envelope: Envelope) -> Result<(), EngineError>;

    /// Insert in order, stopping at the first failure. Envelopes written
    /// before the failure stay written.
    async fn insert_many(
        &self,
        collection: &str,
        envelopes: Vec<Envelope>,
    ) -> Result<(), EngineError>;

    /// Number of envelopes in `collection` matching `filter`.
    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, EngineError>;

    /// Replace the envelope with the same key. Returns whether one matched.
    async fn replace_one(&self, collection: &str, envelope: Envelope) -> Result<bool, EngineError>;

    /// Delete by key. Returns whether a document was deleted.
    async fn delete_one(&self, key: &DocKey) -> Result<bool, EngineError>;

    /// Delete every match. Returns the number deleted.
    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, EngineError>;

    /// Atomically apply `update` to the document at `key` and return its
    /// state afterwards, or `None` if there is no such document.
    async fn find_one_and_update(
        &self,
        key: &DocKey,
        update: &ConditionalUpdate,
    ) -> Result<Option<Envelope>, EngineError>;
}

#[async_trait]
impl<E: DocumentEngine + ?Sized> DocumentEngine for Arc<E> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn find_one(&self, key: &DocKey) -> Result<Option<Envelope>, EngineError> {
        (**self).find_one(key).await
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Envelope>, EngineError> {
        (**self).find(collection, filter).await
    }

    async fn insert_one(&self, collection: &str, envelope: Envelope) -> Result<(), EngineError> {
        (**self).insert_one(collection, envelope).await
    }

    async fn insert_many(
        &self,
        collection: &str,
        envelopes: Vec<Envelope>,
    ) -> Result<(), EngineError> {
        (**self).insert_many(collection, envelopes).await
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, EngineError> {
        (**self).count(collection, filter).await
    }

    async fn replace_one(&self, collection: &str, envelope: Envelope) -> Result<bool, EngineError> {
        (**self).replace_one(collection, envelope).await
    }

    async fn delete_one(&self, key: &DocKey) -> Result<bool, EngineError> {
        (**self).delete_one(key).await
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, EngineError> {
        (**self).delete_many(collection, filter).await
    }

    async fn find_one_and_update(
        &self,
        key: &DocKey,
        update: &ConditionalUpdate,
    ) -> Result<Option<Envelope>, EngineError> {
        (**self).find_one_and_update(key, update).await
    }
}
