//! LMDB-backed document engine.
//!
//! Uses the heed crate (Rust bindings for LMDB) to store envelopes in a single
//! memory-mapped database. Keys follow the layout in [`super::key`], so a
//! `(collection, ver)` scan is a prefix scan. Values are the JSON wire shape
//! of the envelope.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions and admits a single writer at a time:
//! - Read transactions for lookups, scans and counts
//! - Write transactions for inserts, replaces and deletes
//! - The conditional lock update reads, applies and writes inside one write
//!   transaction, which makes it atomic with respect to every other writer

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use vercache_core::{DocKey, EngineError, Envelope};

use super::key;
use super::{ConditionalUpdate, DocumentEngine, Filter};

fn txn_error(e: heed::Error) -> EngineError {
    EngineError::Transaction(e.to_string())
}

/// LMDB document engine.
///
/// # Example
///
/// ```ignore
/// let engine = LmdbEngine::open("/var/lib/vercache", 256)?;
/// let store = VersionedStore::new(engine, CacheStorageConfig::default())?;
/// ```
pub struct LmdbEngine {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
}

impl LmdbEngine {
    /// Open or create an LMDB environment at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the
    /// environment or database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the memory map is never accessed outside heed's transactions.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| EngineError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| EngineError::EnvOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        Ok(Self { env, db })
    }

    fn read_envelope(
        &self,
        txn: &RoTxn<'_>,
        collection: &str,
        encoded: &[u8],
    ) -> Result<Option<Envelope>, EngineError> {
        match self.db.get(txn, encoded).map_err(txn_error)? {
            Some(bytes) => parse(collection, bytes).map(Some),
            None => Ok(None),
        }
    }

    fn write_envelope(
        &self,
        txn: &mut RwTxn<'_>,
        collection: &str,
        envelope: &Envelope,
    ) -> Result<(), EngineError> {
        let encoded = key::encode(&envelope.key(collection));
        let bytes = serde_json::to_vec(envelope).map_err(|e| EngineError::CorruptDocument {
            collection: collection.to_string(),
            reason: e.to_string(),
        })?;
        self.db.put(txn, &encoded, &bytes).map_err(txn_error)
    }

    fn insert_in(
        &self,
        txn: &mut RwTxn<'_>,
        collection: &str,
        envelope: &Envelope,
    ) -> Result<(), EngineError> {
        let encoded = key::encode(&envelope.key(collection));
        if self.db.get(txn, &encoded).map_err(txn_error)?.is_some() {
            return Err(EngineError::DuplicateKey {
                collection: collection.to_string(),
                id: envelope.id.clone(),
                ver: envelope.ver.clone(),
            });
        }
        self.write_envelope(txn, collection, envelope)
    }

    /// Collect every `(key, envelope)` pair in `collection` matching `filter`.
    fn scan(
        &self,
        txn: &RoTxn<'_>,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<(Vec<u8>, Envelope)>, EngineError> {
        let prefix = key::version_prefix(collection, &filter.ver);
        let iter = self.db.prefix_iter(txn, &prefix).map_err(txn_error)?;
        let mut matches = Vec::new();
        for entry in iter {
            let (raw_key, bytes) = entry.map_err(txn_error)?;
            let envelope = parse(collection, bytes)?;
            if filter.matches(&envelope) {
                matches.push((raw_key.to_vec(), envelope));
            }
        }
        Ok(matches)
    }
}

fn parse(collection: &str, bytes: &[u8]) -> Result<Envelope, EngineError> {
    serde_json::from_slice(bytes).map_err(|e| EngineError::CorruptDocument {
        collection: collection.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl DocumentEngine for LmdbEngine {
    fn name(&self) -> &'static str {
        "lmdb"
    }

    async fn find_one(&self, key: &DocKey) -> Result<Option<Envelope>, EngineError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        self.read_envelope(&rtxn, &key.collection, &key::encode(key))
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Envelope>, EngineError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        Ok(self
            .scan(&rtxn, collection, filter)?
            .into_iter()
            .map(|(_, envelope)| envelope)
            .collect())
    }

    async fn insert_one(&self, collection: &str, envelope: Envelope) -> Result<(), EngineError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.insert_in(&mut wtxn, collection, &envelope)?;
        wtxn.commit().map_err(txn_error)
    }

    async fn insert_many(
        &self,
        collection: &str,
        envelopes: Vec<Envelope>,
    ) -> Result<(), EngineError> {
        // One transaction per envelope: a failure keeps earlier writes, like
        // an ordered bulk insert on a document database.
        for envelope in &envelopes {
            let mut wtxn = self.env.write_txn().map_err(txn_error)?;
            self.insert_in(&mut wtxn, collection, envelope)?;
            wtxn.commit().map_err(txn_error)?;
        }
        Ok(())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, EngineError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        Ok(self.scan(&rtxn, collection, filter)?.len() as u64)
    }

    async fn replace_one(&self, collection: &str, envelope: Envelope) -> Result<bool, EngineError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let encoded = key::encode(&envelope.key(collection));
        if self.db.get(&wtxn, &encoded).map_err(txn_error)?.is_none() {
            return Ok(false);
        }
        self.write_envelope(&mut wtxn, collection, &envelope)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(true)
    }

    async fn delete_one(&self, key: &DocKey) -> Result<bool, EngineError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self
            .db
            .delete(&mut wtxn, &key::encode(key))
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, EngineError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let doomed = self.scan(&wtxn, collection, filter)?;
        let mut deleted = 0u64;
        for (raw_key, _) in &doomed {
            if self.db.delete(&mut wtxn, raw_key).map_err(txn_error)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }

    async fn find_one_and_update(
        &self,
        key: &DocKey,
        update: &ConditionalUpdate,
    ) -> Result<Option<Envelope>, EngineError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let Some(mut envelope) = self.read_envelope(&wtxn, &key.collection, &key::encode(key))?
        else {
            return Ok(None);
        };
        if update.apply(&mut envelope) {
            self.write_envelope(&mut wtxn, &key.collection, &envelope)?;
            wtxn.commit().map_err(txn_error)?;
        }
        Ok(Some(envelope))
    }
}
