//! In-memory backends.
//!
//! Used by tests and dry runs. Each store can be told to fail specific
//! operations so partial-failure paths can be exercised.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::node::{NewNode, StorageNode};
use super::profile::Quota;
use super::temp::{NewTempItem, TempStorageItem};
use super::traits::{BlobStore, KeyFailure, NodeStore, ProfileStore, RemoveManyOutcome, TempStore};
use crate::{Result, StowError};

fn injected(what: &str) -> StowError {
    StowError::Database(format!("injected failure: {what}"))
}

/// In-memory [`NodeStore`].
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    nodes: Mutex<Vec<StorageNode>>,
    failing_deletes: Mutex<HashSet<Uuid>>,
    racing_deletes: Mutex<HashSet<Uuid>>,
    fail_listing: AtomicBool,
    ignore_owner_filter: AtomicBool,
    list_calls: AtomicUsize,
}

impl MemoryNodeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node as-is, bypassing all checks.
    ///
    /// Allows cycles and cross-owner parent links.
    pub async fn seed(&self, node: StorageNode) {
        self.nodes.lock().await.push(node);
    }

    /// Make every delete of `id` fail.
    pub async fn fail_delete_of(&self, id: Uuid) {
        self.failing_deletes.lock().await.insert(id);
    }

    /// Undo [`fail_delete_of`](Self::fail_delete_of).
    pub async fn allow_delete_of(&self, id: Uuid) {
        self.failing_deletes.lock().await.remove(&id);
    }

    /// Remove `id` out from under the next batch delete that names it,
    /// as if another request deleted it first.
    pub async fn remove_concurrently(&self, id: Uuid) {
        self.racing_deletes.lock().await.insert(id);
    }

    /// Make every listing fail.
    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Return children of other owners from `list_children`.
    pub fn set_ignore_owner_filter(&self, ignore: bool) {
        self.ignore_owner_filter.store(ignore, Ordering::SeqCst);
    }

    /// Number of `list_children` calls so far.
    pub fn list_children_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Check if a node is still present.
    pub async fn contains(&self, id: Uuid) -> bool {
        self.nodes.lock().await.iter().any(|n| n.id == id)
    }

    /// Number of stored nodes.
    pub async fn len(&self) -> usize {
        self.nodes.lock().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.nodes.lock().await.is_empty()
    }

    /// Copy of all stored nodes.
    pub async fn snapshot(&self) -> Vec<StorageNode> {
        self.nodes.lock().await.clone()
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn get_by_id(&self, id: Uuid, owner: Uuid) -> Result<Option<StorageNode>> {
        let nodes = self.nodes.lock().await;
        Ok(nodes.iter().find(|n| n.id == id && n.owner == owner).cloned())
    }

    async fn list_children(
        &self,
        parent: Uuid,
        owner: Uuid,
        limit: usize,
    ) -> Result<Vec<StorageNode>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(injected("list_children"));
        }

        let ignore_owner = self.ignore_owner_filter.load(Ordering::SeqCst);
        let nodes = self.nodes.lock().await;
        Ok(nodes
            .iter()
            .filter(|n| n.parent_id == Some(parent) && (ignore_owner || n.owner == owner))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_files(&self, owner: Uuid, limit: usize) -> Result<Vec<StorageNode>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(injected("list_files"));
        }

        let nodes = self.nodes.lock().await;
        Ok(nodes
            .iter()
            .filter(|n| n.owner == owner && n.is_file())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_by_id(&self, id: Uuid, owner: Uuid) -> Result<bool> {
        if self.failing_deletes.lock().await.contains(&id) {
            return Err(injected("delete_by_id"));
        }

        let mut nodes = self.nodes.lock().await;
        let before = nodes.len();
        nodes.retain(|n| !(n.id == id && n.owner == owner));
        Ok(nodes.len() < before)
    }

    async fn delete_by_ids(&self, ids: &[Uuid], owner: Uuid) -> Result<u64> {
        let failing = self.failing_deletes.lock().await;
        if ids.iter().any(|id| failing.contains(id)) {
            return Err(injected("delete_by_ids"));
        }

        let mut nodes = self.nodes.lock().await;
        let mut racing = self.racing_deletes.lock().await;
        nodes.retain(|n| !(ids.contains(&n.id) && racing.remove(&n.id)));
        let before = nodes.len();
        nodes.retain(|n| !(n.owner == owner && ids.contains(&n.id)));
        Ok((before - nodes.len()) as u64)
    }

    async fn delete_all_for_owner(&self, owner: Uuid) -> Result<u64> {
        let mut nodes = self.nodes.lock().await;
        let before = nodes.len();
        nodes.retain(|n| n.owner != owner);
        Ok((before - nodes.len()) as u64)
    }

    async fn insert(&self, node: &NewNode) -> Result<StorageNode> {
        let stored = node.clone().into_node(Utc::now());
        self.nodes.lock().await.push(stored.clone());
        Ok(stored)
    }
}

/// In-memory [`TempStore`].
#[derive(Debug, Default)]
pub struct MemoryTempStore {
    items: Mutex<Vec<TempStorageItem>>,
    failing_deletes: Mutex<HashSet<Uuid>>,
    listings_before_failure: Mutex<Option<usize>>,
}

impl MemoryTempStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item as-is.
    pub async fn seed(&self, item: TempStorageItem) {
        self.items.lock().await.push(item);
    }

    /// Make every delete of `id` fail.
    pub async fn fail_delete_of(&self, id: Uuid) {
        self.failing_deletes.lock().await.insert(id);
    }

    /// Let the next `calls` listings succeed and fail every one after them.
    pub async fn fail_listing_after(&self, calls: usize) {
        *self.listings_before_failure.lock().await = Some(calls);
    }

    async fn check_listing(&self, what: &str) -> Result<()> {
        let mut budget = self.listings_before_failure.lock().await;
        match budget.as_mut() {
            Some(0) => Err(injected(what)),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Check if an item is still present.
    pub async fn contains(&self, id: Uuid) -> bool {
        self.items.lock().await.iter().any(|i| i.id == id)
    }

    /// Number of stored items.
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

#[async_trait]
impl TempStore for MemoryTempStore {
    async fn get_by_id(&self, id: Uuid, owner: Uuid) -> Result<Option<TempStorageItem>> {
        let items = self.items.lock().await;
        Ok(items.iter().find(|i| i.id == id && i.owner == owner).cloned())
    }

    async fn list_expired(
        &self,
        owner: Uuid,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TempStorageItem>> {
        self.check_listing("list_expired").await?;
        let items = self.items.lock().await;
        Ok(items
            .iter()
            .filter(|i| i.owner == owner && i.is_expired(now))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_in_blob_store(&self, owner: Uuid, limit: usize) -> Result<Vec<TempStorageItem>> {
        self.check_listing("list_in_blob_store").await?;
        let items = self.items.lock().await;
        Ok(items
            .iter()
            .filter(|i| i.owner == owner && i.in_blob_store())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_by_id(&self, id: Uuid, owner: Uuid) -> Result<bool> {
        if self.failing_deletes.lock().await.contains(&id) {
            return Err(injected("delete_by_id"));
        }

        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|i| !(i.id == id && i.owner == owner));
        Ok(items.len() < before)
    }

    async fn delete_by_ids(&self, ids: &[Uuid], owner: Uuid) -> Result<u64> {
        let failing = self.failing_deletes.lock().await;
        if ids.iter().any(|id| failing.contains(id)) {
            return Err(injected("delete_by_ids"));
        }

        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|i| !(i.owner == owner && ids.contains(&i.id)));
        Ok((before - items.len()) as u64)
    }

    async fn delete_all_for_owner(&self, owner: Uuid) -> Result<u64> {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|i| i.owner != owner);
        Ok((before - items.len()) as u64)
    }

    async fn insert(&self, item: &NewTempItem) -> Result<TempStorageItem> {
        let stored = item.clone().into_item(Utc::now());
        self.items.lock().await.push(stored.clone());
        Ok(stored)
    }
}

/// In-memory [`BlobStore`].
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    failing_keys: Mutex<HashSet<String>>,
    offline: AtomicBool,
    remove_calls: AtomicUsize,
    remove_many_calls: AtomicUsize,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make removal of `key` fail in any bucket.
    pub async fn fail_key(&self, key: impl Into<String>) {
        self.failing_keys.lock().await.insert(key.into());
    }

    /// Make every operation fail.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Check if an object exists.
    pub async fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .await
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }

    /// Number of single-object `remove` calls so far.
    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    /// Number of `remove_many` calls so far.
    pub fn remove_many_calls(&self) -> usize {
        self.remove_many_calls.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StowError::Blob("blob store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()> {
        self.check_online()?;
        self.objects
            .lock()
            .await
            .insert((bucket.to_string(), key.to_string()), data.to_vec());
        Ok(())
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<bool> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if self.failing_keys.lock().await.contains(key) {
            return Err(StowError::Blob(format!("injected failure removing {bucket}/{key}")));
        }

        Ok(self
            .objects
            .lock()
            .await
            .remove(&(bucket.to_string(), key.to_string()))
            .is_some())
    }

    async fn remove_many(&self, bucket: &str, keys: &[String]) -> Result<RemoveManyOutcome> {
        self.remove_many_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let failing = self.failing_keys.lock().await;
        let mut objects = self.objects.lock().await;
        let mut outcome = RemoveManyOutcome::default();
        for key in keys {
            if failing.contains(key) {
                outcome.failures.push(KeyFailure {
                    key: key.clone(),
                    reason: "injected failure".to_string(),
                });
            } else if objects.remove(&(bucket.to_string(), key.clone())).is_some() {
                outcome.removed += 1;
            } else {
                outcome.missing += 1;
            }
        }

        Ok(outcome)
    }
}

/// In-memory [`ProfileStore`].
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<HashMap<Uuid, Quota>>,
    fail_reads: AtomicBool,
    fail_updates: AtomicBool,
}

impl MemoryProfileStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a profile's quota directly.
    pub async fn seed(&self, owner: Uuid, quota: Quota) {
        self.profiles.lock().await.insert(owner, quota);
    }

    /// Make every `get_quota` fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every `set_used` fail.
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Current used bytes of a profile.
    pub async fn used(&self, owner: Uuid) -> Option<u64> {
        self.profiles.lock().await.get(&owner).map(|q| q.used)
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get_quota(&self, owner: Uuid) -> Result<Option<Quota>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(injected("get_quota"));
        }
        Ok(self.profiles.lock().await.get(&owner).copied())
    }

    async fn set_used(&self, owner: Uuid, used: u64) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(injected("set_used"));
        }

        let mut profiles = self.profiles.lock().await;
        match profiles.get_mut(&owner) {
            Some(quota) => {
                quota.used = used;
                Ok(())
            }
            None => Err(StowError::NotFound("profile".to_string())),
        }
    }

    async fn create_profile(&self, owner: Uuid, limit: Option<u64>) -> Result<Quota> {
        let quota = Quota::new(0, limit);
        self.profiles.lock().await.insert(owner, quota);
        Ok(quota)
    }

    async fn delete_profile(&self, owner: Uuid) -> Result<bool> {
        Ok(self.profiles.lock().await.remove(&owner).is_some())
    }
}
