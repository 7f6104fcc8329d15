//! Binary key layout for ordered key-value engines.
//!
//! # Binary Format
//!
//! ```text
//! [collection len: u32 BE][collection bytes][ver len: u32 BE][ver bytes][id bytes]
//! ```
//!
//! Length-prefixing the collection and version makes the `(collection, ver)`
//! prefix exact: a scan over one version can never pick up keys of another
//! version or collection whose name merely shares a byte prefix. Within one
//! `(collection, ver)` pair keys sort by id.

use vercache_core::DocKey;

/// Prefix shared by every key of one `(collection, ver)` pair.
pub fn version_prefix(collection: &str, ver: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8 + collection.len() + ver.len());
    push_segment(&mut bytes, collection);
    push_segment(&mut bytes, ver);
    bytes
}

/// Full key for one document.
pub fn encode(key: &DocKey) -> Vec<u8> {
    let mut bytes = version_prefix(&key.collection, &key.ver);
    bytes.extend_from_slice(key.id.as_bytes());
    bytes
}

fn push_segment(bytes: &mut Vec<u8>, segment: &str) {
    bytes.extend_from_slice(&(segment.len() as u32).to_be_bytes());
    bytes.extend_from_slice(segment.as_bytes());
}
