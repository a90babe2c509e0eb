//! Account-wide deletion.
//!
//! Unlike the tree walk, the sweep ignores the folder structure: it pages
//! through every file row of the owner, removes objects one bucket at a time,
//! and finally drops whatever rows remain.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::log_orphan;
use super::report::{DeletionErrorKind, ErrorLog};
use crate::config::{DeletionConfig, StorageConfig};
use crate::storage::{BlobLocator, BlobStore, NodeStore, ProfileStore, TempStore};
use crate::validation;

/// Outcome of an account-wide deletion.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDeletionResult {
    /// Long-term file rows removed in the paged phase.
    pub files_deleted: u64,
    /// Temporary share rows removed.
    pub temp_items_deleted: u64,
    /// Sizes of all blob-backed rows removed.
    ///
    /// A page whose batch delete removed fewer rows than were listed is
    /// left out, since the rows that vanished in between cannot be told
    /// apart from the ones removed here.
    pub bytes_freed: u64,
    /// Rows (folders, link-only files) removed in the final cleanup.
    pub nodes_removed_in_cleanup: u64,
    /// Whether the profile row was removed.
    pub profile_deleted: bool,
    /// Objects that could not be removed and need out-of-band cleanup.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub orphaned_blobs: Vec<BlobLocator>,
    /// Problems encountered along the way.
    pub errors: ErrorLog,
}

impl AccountDeletionResult {
    /// True when no critical error was recorded.
    pub fn success(&self) -> bool {
        !self.errors.has_critical()
    }
}

/// Deletes everything an owner has stored.
pub struct AccountSweeper<'a> {
    nodes: &'a dyn NodeStore,
    temps: &'a dyn TempStore,
    blobs: &'a dyn BlobStore,
    profiles: &'a dyn ProfileStore,
    storage: &'a StorageConfig,
    limits: DeletionConfig,
}

/// Objects of one page, grouped by bucket.
type BucketKeys = BTreeMap<String, Vec<String>>;

impl<'a> AccountSweeper<'a> {
    /// Create a sweeper with default limits.
    pub fn new(
        nodes: &'a dyn NodeStore,
        temps: &'a dyn TempStore,
        blobs: &'a dyn BlobStore,
        profiles: &'a dyn ProfileStore,
        storage: &'a StorageConfig,
    ) -> Self {
        Self {
            nodes,
            temps,
            blobs,
            profiles,
            storage,
            limits: DeletionConfig::default(),
        }
    }

    /// Use the given paging limits.
    pub fn with_limits(mut self, limits: DeletionConfig) -> Self {
        self.limits = limits;
        self
    }

    /// Delete all objects and rows of `owner`.
    ///
    /// Never fails as a whole; check [`AccountDeletionResult::success`].
    pub async fn delete_all_for_owner(&self, owner: Uuid) -> AccountDeletionResult {
        info!(owner = %owner, "Starting account deletion");
        let mut result = AccountDeletionResult::default();

        self.sweep_files(owner, &mut result).await;
        self.sweep_temp_items(owner, &mut result).await;
        self.remove_profile_image(owner, &mut result).await;
        self.remove_remaining_rows(owner, &mut result).await;

        if result.success() {
            info!(
                owner = %owner,
                files = result.files_deleted,
                temp_items = result.temp_items_deleted,
                bytes = result.bytes_freed,
                orphans = result.orphaned_blobs.len(),
                warnings = result.errors.len(),
                "Account deletion finished"
            );
        } else {
            error!(
                owner = %owner,
                errors = result.errors.len(),
                "Account deletion finished with critical errors"
            );
        }
        result
    }

    async fn sweep_files(&self, owner: Uuid, result: &mut AccountDeletionResult) {
        let batch_size = self.limits.batch_size.max(1);
        let mut pages = 0;

        loop {
            if pages >= self.limits.max_iterations {
                result.errors.record(
                    DeletionErrorKind::IterationLimitReached,
                    "storage_file_limit",
                    format!("stopped after {pages} pages of files; owner may have excessive files"),
                    None,
                );
                break;
            }

            let files = match self.nodes.list_files(owner, batch_size).await {
                Ok(files) => files,
                Err(e) => {
                    result.errors.record(
                        DeletionErrorKind::ListingFailed,
                        "fetch_storage_files",
                        format!("failed to list files: {e}"),
                        None,
                    );
                    break;
                }
            };
            if files.is_empty() {
                break;
            }
            pages += 1;

            let located = files
                .iter()
                .filter_map(|f| f.blob.as_ref().map(|locator| (f.id, locator)));
            let grouped = self.group_by_bucket(owner, located, &mut result.errors);
            let orphans = self
                .remove_grouped(owner, grouped, "delete_storage_files", &mut result.errors)
                .await;
            result.orphaned_blobs.extend(orphans);

            let ids: Vec<Uuid> = files.iter().map(|f| f.id).collect();
            match self.nodes.delete_by_ids(&ids, owner).await {
                Ok(deleted) => {
                    result.files_deleted += deleted;
                    if deleted == ids.len() as u64 {
                        result.bytes_freed = files
                            .iter()
                            .filter(|f| f.blob.is_some())
                            .fold(result.bytes_freed, |acc, f| acc.saturating_add(f.byte_size));
                    } else {
                        debug!(
                            owner = %owner,
                            listed = ids.len(),
                            deleted,
                            "File rows vanished during account deletion; page bytes not counted"
                        );
                    }
                }
                Err(e) => {
                    result.errors.record(
                        DeletionErrorKind::MetadataDeletionFailed,
                        "delete_storage_nodes_batch",
                        format!("failed to delete {} file rows: {e}", ids.len()),
                        None,
                    );
                    break;
                }
            }

            if files.len() < batch_size {
                break;
            }
        }
    }

    async fn sweep_temp_items(&self, owner: Uuid, result: &mut AccountDeletionResult) {
        let batch_size = self.limits.batch_size.max(1);
        let mut pages = 0;

        loop {
            if pages >= self.limits.max_iterations {
                result.errors.record(
                    DeletionErrorKind::IterationLimitReached,
                    "temp_file_limit",
                    format!("stopped after {pages} pages of temporary shares"),
                    None,
                );
                break;
            }

            let items = match self.temps.list_in_blob_store(owner, batch_size).await {
                Ok(items) => items,
                Err(e) => {
                    result.errors.record(
                        DeletionErrorKind::ListingFailed,
                        "fetch_temp_files",
                        format!("failed to list temporary shares: {e}"),
                        None,
                    );
                    break;
                }
            };
            if items.is_empty() {
                break;
            }
            pages += 1;

            let located = items
                .iter()
                .filter_map(|item| item.blob().map(|locator| (item.id, locator)));
            let grouped = self.group_by_bucket(owner, located, &mut result.errors);
            let orphans = self
                .remove_grouped(owner, grouped, "delete_temp_files", &mut result.errors)
                .await;
            result.orphaned_blobs.extend(orphans);

            let ids: Vec<Uuid> = items.iter().map(|i| i.id).collect();
            match self.temps.delete_by_ids(&ids, owner).await {
                Ok(deleted) => {
                    result.temp_items_deleted += deleted;
                    if deleted == ids.len() as u64 {
                        result.bytes_freed = items
                            .iter()
                            .fold(result.bytes_freed, |acc, i| acc.saturating_add(i.byte_size));
                    } else {
                        debug!(
                            owner = %owner,
                            listed = ids.len(),
                            deleted,
                            "Temporary shares vanished during account deletion; page bytes not counted"
                        );
                    }
                }
                Err(e) => {
                    result.errors.record(
                        DeletionErrorKind::MetadataDeletionFailed,
                        "delete_temp_storage_batch",
                        format!("failed to delete {} temporary share rows: {e}", ids.len()),
                        None,
                    );
                    break;
                }
            }

            if items.len() < batch_size {
                break;
            }
        }
    }

    /// Validate locators and group their keys by bucket.
    ///
    /// Invalid locators are recorded and left untouched in the blob store.
    fn group_by_bucket<'l>(
        &self,
        owner: Uuid,
        located: impl Iterator<Item = (Uuid, &'l BlobLocator)>,
        errors: &mut ErrorLog,
    ) -> BucketKeys {
        let mut grouped = BucketKeys::new();
        for (id, locator) in located {
            if let Err(reason) = validation::check_blob_locator(locator, owner, self.storage) {
                errors.record(
                    DeletionErrorKind::InvalidBlobLocator,
                    "validate_blob_locator",
                    format!("object of {id} not removed: {reason}"),
                    Some(id),
                );
                continue;
            }
            grouped
                .entry(locator.bucket.clone())
                .or_default()
                .push(locator.key.clone());
        }
        grouped
    }

    /// One `remove_many` per bucket. Returns the objects left behind.
    async fn remove_grouped(
        &self,
        owner: Uuid,
        grouped: BucketKeys,
        step: &str,
        errors: &mut ErrorLog,
    ) -> Vec<BlobLocator> {
        let mut orphans = Vec::new();
        for (bucket, keys) in grouped {
            match self.blobs.remove_many(&bucket, &keys).await {
                Ok(outcome) => {
                    for failure in outcome.failures {
                        let locator = BlobLocator::new(bucket.as_str(), failure.key);
                        log_orphan(owner, None, &locator, &failure.reason);
                        errors.record(
                            DeletionErrorKind::BlobDeletionFailed,
                            step,
                            format!("failed to remove object {locator}: {}", failure.reason),
                            None,
                        );
                        orphans.push(locator);
                    }
                }
                Err(e) => {
                    errors.record(
                        DeletionErrorKind::BlobDeletionFailed,
                        step,
                        format!("failed to remove {} objects from {bucket}: {e}", keys.len()),
                        None,
                    );
                    for key in keys {
                        let locator = BlobLocator::new(bucket.as_str(), key);
                        log_orphan(owner, None, &locator, &e);
                        orphans.push(locator);
                    }
                }
            }
        }
        orphans
    }

    async fn remove_profile_image(&self, owner: Uuid, result: &mut AccountDeletionResult) {
        let bucket = &self.storage.profile_image_bucket;
        let key = validation::profile_image_key(owner);

        if let Err(e) = self.blobs.remove(bucket, &key).await {
            let locator = BlobLocator::new(bucket.as_str(), key);
            log_orphan(owner, None, &locator, &e);
            result.errors.record(
                DeletionErrorKind::BlobDeletionFailed,
                "delete_profile_image",
                format!("failed to remove profile image: {e}"),
                None,
            );
            result.orphaned_blobs.push(locator);
        }
    }

    async fn remove_remaining_rows(&self, owner: Uuid, result: &mut AccountDeletionResult) {
        match self.nodes.delete_all_for_owner(owner).await {
            Ok(removed) => result.nodes_removed_in_cleanup = removed,
            Err(e) => result.errors.record_critical(
                DeletionErrorKind::CleanupFailed,
                "delete_storage_nodes",
                format!("failed to delete remaining storage nodes: {e}"),
                None,
            ),
        }

        match self.temps.delete_all_for_owner(owner).await {
            Ok(removed) => result.temp_items_deleted += removed,
            Err(e) => result.errors.record_critical(
                DeletionErrorKind::CleanupFailed,
                "delete_temp_storage",
                format!("failed to delete remaining temporary shares: {e}"),
                None,
            ),
        }

        match self.profiles.delete_profile(owner).await {
            Ok(deleted) => result.profile_deleted = deleted,
            Err(e) => result.errors.record_critical(
                DeletionErrorKind::CleanupFailed,
                "delete_profile",
                format!("failed to delete profile: {e}"),
                None,
            ),
        }
    }
}
