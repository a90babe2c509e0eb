//! Storage backends for Stowbox.
//!
//! This module provides:
//! - Domain types for tree nodes, temporary shares and quotas
//! - Backend traits used by the deletion engine
//! - SQLite metadata stores and a filesystem blob store
//! - In-memory backends for tests

mod blob;
mod memory;
mod node;
mod profile;
mod repository;
mod temp;
mod traits;

pub use blob::FsBlobStore;
pub use memory::{MemoryBlobStore, MemoryNodeStore, MemoryProfileStore, MemoryTempStore};
pub use node::{BlobLocator, NewNode, NodeKind, StorageNode};
pub use profile::Quota;
pub use repository::{SqliteNodeStore, SqliteProfileStore, SqliteTempStore};
pub use temp::{NewTempItem, TempContent, TempStorageItem};
pub use traits::{BlobStore, KeyFailure, NodeStore, ProfileStore, RemoveManyOutcome, TempStore};

use chrono::{DateTime, Utc};

/// Convert a timestamp to Unix milliseconds for storage.
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Convert stored Unix milliseconds back to a timestamp.
pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Convert a byte count to a SQLite integer, saturating at `i64::MAX`.
pub(crate) fn to_db_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}
