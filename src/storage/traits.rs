//! Storage backend traits.
//!
//! The deletion engine and the quota reconciler only talk to these traits,
//! so they run unchanged against SQLite, the filesystem blob store, or the
//! in-memory backends used by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::node::{NewNode, StorageNode};
use super::profile::Quota;
use super::temp::{NewTempItem, TempStorageItem};
use crate::Result;

/// Metadata store for the long-term storage tree.
///
/// Every read and delete is filtered by owner. Callers still re-check the
/// owner of each returned row.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Fetch a node by ID, restricted to `owner`.
    async fn get_by_id(&self, id: Uuid, owner: Uuid) -> Result<Option<StorageNode>>;

    /// List up to `limit` direct children of `parent`.
    async fn list_children(
        &self,
        parent: Uuid,
        owner: Uuid,
        limit: usize,
    ) -> Result<Vec<StorageNode>>;

    /// List up to `limit` file nodes of `owner`, regardless of position in the tree.
    async fn list_files(&self, owner: Uuid, limit: usize) -> Result<Vec<StorageNode>>;

    /// Delete a single node. Returns `false` if no row matched.
    async fn delete_by_id(&self, id: Uuid, owner: Uuid) -> Result<bool>;

    /// Delete many nodes in one statement. Returns the number of rows removed.
    async fn delete_by_ids(&self, ids: &[Uuid], owner: Uuid) -> Result<u64>;

    /// Delete every node of `owner`. Returns the number of rows removed.
    async fn delete_all_for_owner(&self, owner: Uuid) -> Result<u64>;

    /// Insert a new node.
    async fn insert(&self, node: &NewNode) -> Result<StorageNode>;
}

/// Metadata store for temporary shares.
#[async_trait]
pub trait TempStore: Send + Sync {
    /// Fetch an item by ID, restricted to `owner`.
    async fn get_by_id(&self, id: Uuid, owner: Uuid) -> Result<Option<TempStorageItem>>;

    /// List up to `limit` items of `owner` that expired at or before `now`.
    async fn list_expired(
        &self,
        owner: Uuid,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TempStorageItem>>;

    /// List up to `limit` items of `owner` whose content is in the blob store.
    async fn list_in_blob_store(&self, owner: Uuid, limit: usize) -> Result<Vec<TempStorageItem>>;

    /// Delete a single item. Returns `false` if no row matched.
    async fn delete_by_id(&self, id: Uuid, owner: Uuid) -> Result<bool>;

    /// Delete many items in one statement. Returns the number of rows removed.
    async fn delete_by_ids(&self, ids: &[Uuid], owner: Uuid) -> Result<u64>;

    /// Delete every item of `owner`. Returns the number of rows removed.
    async fn delete_all_for_owner(&self, owner: Uuid) -> Result<u64>;

    /// Insert a new item.
    async fn insert(&self, item: &NewTempItem) -> Result<TempStorageItem>;
}

/// A key that could not be removed by [`BlobStore::remove_many`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFailure {
    /// Object key.
    pub key: String,
    /// Why removal failed.
    pub reason: String,
}

/// Result of a batched blob removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveManyOutcome {
    /// Objects removed.
    pub removed: usize,
    /// Keys that were already absent.
    pub missing: usize,
    /// Keys that could not be removed.
    pub failures: Vec<KeyFailure>,
}

/// Object storage for file content.
///
/// Removing an absent object is not an error.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store an object, replacing any existing one.
    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()>;

    /// Remove one object. Returns `false` if it did not exist.
    async fn remove(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Remove many objects from one bucket.
    ///
    /// An `Err` means the whole batch failed; per-key problems are reported
    /// in [`RemoveManyOutcome::failures`].
    async fn remove_many(&self, bucket: &str, keys: &[String]) -> Result<RemoveManyOutcome>;
}

/// Per-owner profile rows holding the quota counter.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Read the quota of `owner`, or `None` if no profile exists.
    async fn get_quota(&self, owner: Uuid) -> Result<Option<Quota>>;

    /// Overwrite the used-bytes counter.
    async fn set_used(&self, owner: Uuid, used: u64) -> Result<()>;

    /// Create a profile with zero usage.
    async fn create_profile(&self, owner: Uuid, limit: Option<u64>) -> Result<Quota>;

    /// Delete the profile. Returns `false` if none existed.
    async fn delete_profile(&self, owner: Uuid) -> Result<bool>;
}
