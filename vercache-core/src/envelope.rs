//! Envelope data model.
//!
//! An [`Envelope`] is the unit physically stored by an engine: the caller's
//! serialized value plus identity, version tag and optional lock metadata.
//! The wire shape is
//!
//! ```text
//! { "id": <string>, "ver": <string>, "data": <payload>,
//!   "locked": null | { "lockedAt": <timestamp>, "lockedBy": <string> } }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// Reserved version tag meaning "resolve through the version registry".
///
/// Never stored on an envelope.
pub const LATEST_VERSION: &str = "latest";

// ============================================================================
// PAYLOAD
// ============================================================================

/// Opaque serialized form of a caller's value.
///
/// The store never interprets the contents; only the codec does.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(serde_json::Value);

impl Payload {
    /// Wrap an already-serialized value.
    pub fn from_value(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Borrow the serialized form.
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// LOCK INFO
// ============================================================================

/// Lock metadata embedded in an envelope checked out by a lock holder.
///
/// Both fields default when missing so that a malformed lock written by
/// another client still deserializes; [`LockInfo::is_well_formed`] reports it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    #[serde(default)]
    pub locked_at: Option<Timestamp>,
    #[serde(default)]
    pub locked_by: String,
}

impl LockInfo {
    /// Create a lock held by `token` since `now`.
    pub fn new(token: impl Into<String>, now: Timestamp) -> Self {
        Self {
            locked_at: Some(now),
            locked_by: token.into(),
        }
    }

    /// A lock is well formed when it names both a holder and a timestamp.
    pub fn is_well_formed(&self) -> bool {
        self.locked_at.is_some() && !self.locked_by.is_empty()
    }

    /// Whether the lock was taken before `stale_before`.
    pub fn is_stale(&self, stale_before: Timestamp) -> bool {
        match self.locked_at {
            Some(at) => at < stale_before,
            None => true,
        }
    }

    /// Whether this lock still excludes other holders at `stale_before`.
    pub fn is_held(&self, stale_before: Timestamp) -> bool {
        self.is_well_formed() && !self.is_stale(stale_before)
    }

    /// Whether `token` owns this lock.
    pub fn is_owned_by(&self, token: &str) -> bool {
        !self.locked_by.is_empty() && self.locked_by == token
    }
}

// ============================================================================
// ENVELOPE
// ============================================================================

/// The wire/storage record wrapping a caller's serialized value.
///
/// `(collection, id, ver)` is the primary key; the collection is implied by
/// where the envelope is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub ver: String,
    pub data: Payload,
    #[serde(default)]
    pub locked: Option<LockInfo>,
}

impl Envelope {
    /// Create an unlocked envelope.
    pub fn new(id: impl Into<String>, ver: impl Into<String>, data: Payload) -> Self {
        Self {
            id: id.into(),
            ver: ver.into(),
            data,
            locked: None,
        }
    }

    /// Builder-style lock attachment.
    pub fn with_lock(mut self, lock: LockInfo) -> Self {
        self.locked = Some(lock);
        self
    }

    /// The envelope's key within `collection`.
    pub fn key(&self, collection: &str) -> DocKey {
        DocKey::new(collection, &self.id, &self.ver)
    }

    /// Holder token of the current lock, if any.
    pub fn lock_holder(&self) -> Option<&str> {
        self.locked
            .as_ref()
            .filter(|lock| !lock.locked_by.is_empty())
            .map(|lock| lock.locked_by.as_str())
    }
}

// ============================================================================
// DOCUMENT KEY
// ============================================================================

/// Primary key of an envelope: `(collection, id, ver)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocKey {
    pub collection: String,
    pub id: String,
    pub ver: String,
}

impl DocKey {
    pub fn new(collection: impl Into<String>, id: impl Into<String>, ver: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            ver: ver.into(),
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.collection, self.id, self.ver)
    }
}

// ============================================================================
// VERSION REGISTRY RECORD
// ============================================================================

/// Registry entry naming the latest version of a data collection.
///
/// Stored as the payload of an envelope with `id = collection_name` in the
/// registry collection, at the registry's fixed version tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheVersion {
    pub collection_name: String,
    pub version: String,
}

impl CacheVersion {
    pub fn new(collection_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            collection_name: collection_name.into(),
            version: version.into(),
        }
    }
}

// ============================================================================
// DESTINATION SHAPE
// ============================================================================

/// Shape of a caller-supplied destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestinationShape {
    /// Exactly one value.
    Single,
    /// Id-keyed map of values.
    Keyed,
    /// Ordered sequence of values.
    Sequence,
}

impl DestinationShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationShape::Single => "single value",
            DestinationShape::Keyed => "keyed map",
            DestinationShape::Sequence => "sequence",
        }
    }
}

impl fmt::Display for DestinationShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
