//! In-memory document engine.
//!
//! Collections are `BTreeMap`s ordered by `(ver, id)` behind a single
//! `RwLock`, so version scans are range scans and every write, including the
//! conditional lock update, is serialised by the write lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use vercache_core::{DocKey, EngineError, Envelope};

use super::{ConditionalUpdate, DocumentEngine, Filter};

type Collection = BTreeMap<(String, String), Envelope>;

/// Thread-safe in-memory engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
}

impl MemoryEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every collection.
    pub fn clear(&self) -> Result<(), EngineError> {
        self.write()?.clear();
        Ok(())
    }

    /// Number of envelopes stored in `collection`, across all versions.
    pub fn len(&self, collection: &str) -> Result<usize, EngineError> {
        Ok(self.read()?.get(collection).map_or(0, BTreeMap::len))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Collection>>, EngineError> {
        self.collections.read().map_err(|_| EngineError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Collection>>, EngineError> {
        self.collections.write().map_err(|_| EngineError::LockPoisoned)
    }
}

fn row_key(ver: &str, id: &str) -> (String, String) {
    (ver.to_string(), id.to_string())
}

fn matching<'a>(
    collection: &'a Collection,
    filter: &'a Filter,
) -> impl Iterator<Item = &'a Envelope> + 'a {
    collection
        .range(row_key(&filter.ver, "")..)
        .take_while(move |((ver, _), _)| *ver == filter.ver)
        .map(|(_, envelope)| envelope)
        .filter(move |envelope| filter.matches(envelope))
}

fn insert_into(
    collections: &mut HashMap<String, Collection>,
    collection: &str,
    envelope: Envelope,
) -> Result<(), EngineError> {
    let rows = collections.entry(collection.to_string()).or_default();
    let key = row_key(&envelope.ver, &envelope.id);
    if rows.contains_key(&key) {
        return Err(EngineError::DuplicateKey {
            collection: collection.to_string(),
            id: envelope.id,
            ver: envelope.ver,
        });
    }
    rows.insert(key, envelope);
    Ok(())
}

#[async_trait]
impl DocumentEngine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn find_one(&self, key: &DocKey) -> Result<Option<Envelope>, EngineError> {
        let collections = self.read()?;
        Ok(collections
            .get(&key.collection)
            .and_then(|rows| rows.get(&row_key(&key.ver, &key.id)))
            .cloned())
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Envelope>, EngineError> {
        let collections = self.read()?;
        Ok(collections
            .get(collection)
            .map(|rows| matching(rows, filter).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_one(&self, collection: &str, envelope: Envelope) -> Result<(), EngineError> {
        let mut collections = self.write()?;
        insert_into(&mut collections, collection, envelope)
    }

    async fn insert_many(
        &self,
        collection: &str,
        envelopes: Vec<Envelope>,
    ) -> Result<(), EngineError> {
        let mut collections = self.write()?;
        for envelope in envelopes {
            insert_into(&mut collections, collection, envelope)?;
        }
        Ok(())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, EngineError> {
        let collections = self.read()?;
        Ok(collections
            .get(collection)
            .map_or(0, |rows| matching(rows, filter).count() as u64))
    }

    async fn replace_one(&self, collection: &str, envelope: Envelope) -> Result<bool, EngineError> {
        let mut collections = self.write()?;
        let Some(rows) = collections.get_mut(collection) else {
            return Ok(false);
        };
        match rows.get_mut(&row_key(&envelope.ver, &envelope.id)) {
            Some(existing) => {
                *existing = envelope;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_one(&self, key: &DocKey) -> Result<bool, EngineError> {
        let mut collections = self.write()?;
        Ok(collections
            .get_mut(&key.collection)
            .and_then(|rows| rows.remove(&row_key(&key.ver, &key.id)))
            .is_some())
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, EngineError> {
        let mut collections = self.write()?;
        let Some(rows) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let doomed: Vec<(String, String)> = matching(rows, filter)
            .map(|envelope| row_key(&envelope.ver, &envelope.id))
            .collect();
        for key in &doomed {
            rows.remove(key);
        }
        Ok(doomed.len() as u64)
    }

    async fn find_one_and_update(
        &self,
        key: &DocKey,
        update: &ConditionalUpdate,
    ) -> Result<Option<Envelope>, EngineError> {
        let mut collections = self.write()?;
        let Some(envelope) = collections
            .get_mut(&key.collection)
            .and_then(|rows| rows.get_mut(&row_key(&key.ver, &key.id)))
        else {
            return Ok(None);
        };
        update.apply(envelope);
        Ok(Some(envelope.clone()))
    }
}
