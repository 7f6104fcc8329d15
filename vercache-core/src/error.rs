//! Error types for vercache operations
//!
//! Every failure surfaced to a caller is a [`CacheStorageError`], which always
//! classifies into one of three [`ErrorKind`]s. Engine and codec failures are
//! wrapped, never discarded.

use thiserror::Error;

use crate::envelope::DestinationShape;
use crate::operation::Operation;

/// Closed classification of every cache storage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Key, version or registry entry absent.
    NotFound,
    /// Caller supplied a destination of the wrong shape.
    InvalidDestinationType,
    /// Anything else: engine, codec, cancellation, deadline.
    Other,
}

/// Storage engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Duplicate key {collection}/{id}@{ver}")]
    DuplicateKey {
        collection: String,
        id: String,
        ver: String,
    },

    #[error("Failed to open storage environment: {0}")]
    EnvOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Corrupt document in {collection}: {reason}")]
    CorruptDocument { collection: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

/// Payload encode/decode errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Deserialization into {target} failed: {reason}")]
    Deserialize { target: &'static str, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for cache storage operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheStorageError {
    #[error("Not found: {collection}/{id}@{ver}")]
    NotFound {
        collection: String,
        id: String,
        ver: String,
    },

    #[error("Not found: {} of {requested} ids missing from {collection}@{ver}: {missing_ids:?}", .missing_ids.len())]
    ManyNotFound {
        collection: String,
        ver: String,
        requested: usize,
        missing_ids: Vec<String>,
    },

    #[error("Not found: no latest version registered for collection {collection}")]
    VersionNotRegistered { collection: String },

    #[error("Invalid dest type: {operation} requires a {expected} destination, got {actual} ({type_name})")]
    InvalidDestinationType {
        operation: Operation,
        expected: DestinationShape,
        actual: DestinationShape,
        type_name: &'static str,
    },

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded during {operation} on {target}")]
    DeadlineExceeded { operation: Operation, target: String },
}

impl CacheStorageError {
    /// Classify this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheStorageError::NotFound { .. }
            | CacheStorageError::ManyNotFound { .. }
            | CacheStorageError::VersionNotRegistered { .. } => ErrorKind::NotFound,
            CacheStorageError::InvalidDestinationType { .. } => ErrorKind::InvalidDestinationType,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_invalid_destination_type(&self) -> bool {
        self.kind() == ErrorKind::InvalidDestinationType
    }

    /// Ids a bulk read could not find. Empty for every other failure.
    pub fn not_found_ids(&self) -> &[String] {
        match self {
            CacheStorageError::ManyNotFound { missing_ids, .. } => missing_ids,
            _ => &[],
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Point lookup miss on `(collection, id, ver)`.
    pub fn missing(collection: &str, id: &str, ver: &str) -> Self {
        CacheStorageError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
            ver: ver.to_string(),
        }
    }
}

/// Result type alias for cache storage operations.
pub type CacheResult<T> = Result<T, CacheStorageError>;

// =============================================================================
// TESTS
// =============================================================================
