//! VERCACHE Core - Envelope Model and Error Taxonomy
//!
//! Pure data structures shared by every vercache crate: the stored envelope
//! and its lock metadata, the version registry record, the request context
//! used for lock ownership and cancellation, configuration, and the closed
//! error taxonomy. This crate performs no I/O.

pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod operation;

pub use config::CacheStorageConfig;
pub use context::{CancelHandle, RequestContext};
pub use envelope::{
    CacheVersion, DestinationShape, DocKey, Envelope, LockInfo, Payload, LATEST_VERSION,
};
pub use error::{
    CacheResult, CacheStorageError, CodecError, ConfigError, EngineError, ErrorKind,
};
pub use operation::Operation;

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
