//! Storage service for Stowbox.
//!
//! This is the layer a request handler calls. It validates input, runs the
//! deletion engine, reconciles the quota, and builds serializable responses.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Config, DeletionConfig, StorageConfig, TempConfig};
use crate::db::Database;
use crate::deletion::{
    log_orphan, AccountDeletionResult, AccountSweeper, DeletionErrorKind, ErrorLog, TreeDeleter,
    Warning,
};
use crate::quota::{self, QuotaOutcome, QuotaReconciler};
use crate::storage::{
    BlobLocator, BlobStore, NewNode, NewTempItem, NodeStore, ProfileStore, Quota, SqliteNodeStore,
    SqliteProfileStore, SqliteTempStore, StorageNode, TempStorageItem, TempStore,
};
use crate::validation;
use crate::{Result, StowError};

/// The four backends a service runs on.
#[derive(Clone)]
pub struct Backends {
    /// Long-term tree metadata.
    pub nodes: Arc<dyn NodeStore>,
    /// Temporary share metadata.
    pub temps: Arc<dyn TempStore>,
    /// Object storage.
    pub blobs: Arc<dyn BlobStore>,
    /// Profiles and quotas.
    pub profiles: Arc<dyn ProfileStore>,
}

impl Backends {
    /// Bundle the given backends.
    pub fn new(
        nodes: Arc<dyn NodeStore>,
        temps: Arc<dyn TempStore>,
        blobs: Arc<dyn BlobStore>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        Self {
            nodes,
            temps,
            blobs,
            profiles,
        }
    }

    /// SQLite metadata stores on `db` with the given blob store.
    pub fn sqlite(db: &Database, blobs: Arc<dyn BlobStore>) -> Self {
        Self::new(
            Arc::new(SqliteNodeStore::new(db.pool().clone())),
            Arc::new(SqliteTempStore::new(db.pool().clone())),
            blobs,
            Arc::new(SqliteProfileStore::new(db.pool().clone())),
        )
    }
}

/// Response to a node deletion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNodeResponse {
    /// Whether the requested node is gone.
    pub success: bool,
    /// Summary for the client.
    pub message: String,
    /// Files removed.
    pub files_deleted: u64,
    /// Folders removed.
    pub folders_deleted: u64,
    /// Bytes released.
    pub total_bytes_deleted: u64,
    /// Objects whose metadata is gone but which could not be removed.
    /// Their locations are logged for out-of-band cleanup.
    pub orphaned_objects: usize,
    /// Non-fatal problems.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
    /// Quota update outcome.
    #[serde(skip)]
    pub quota: QuotaOutcome,
}

/// Response to a temporary share deletion or expiry sweep.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTempResponse {
    /// Whether the request completed.
    pub success: bool,
    /// Summary for the client.
    pub message: String,
    /// Items removed.
    pub items_deleted: u64,
    /// Bytes released.
    pub bytes_freed: u64,
    /// Non-fatal problems.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
    /// Quota update outcome.
    #[serde(skip)]
    pub quota: QuotaOutcome,
}

/// Response to an upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse<T> {
    /// Stored record.
    pub data: T,
    /// Non-fatal problems.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

/// A long-term file upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Target folder (None = root of the tree).
    pub parent_id: Option<Uuid>,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Client-side file name.
    pub file_name: String,
    /// MIME type.
    pub mime_type: String,
    /// File content.
    pub content: Vec<u8>,
}

impl UploadRequest {
    /// Create a request for the root of the tree.
    pub fn new(
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            parent_id: None,
            name: name.into(),
            description: None,
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            content,
        }
    }

    /// Upload into a folder.
    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A temporary file share.
#[derive(Debug, Clone)]
pub struct TempFileRequest {
    /// Client-side file name.
    pub file_name: String,
    /// MIME type.
    pub mime_type: String,
    /// File content.
    pub content: Vec<u8>,
    /// Lifetime in minutes.
    pub duration_minutes: i64,
}

/// Storage operations for authenticated owners.
pub struct StorageService {
    backends: Backends,
    storage: StorageConfig,
    deletion: DeletionConfig,
    temp: TempConfig,
}

impl StorageService {
    /// Create a service from backends and configuration.
    pub fn new(backends: Backends, config: &Config) -> Self {
        Self {
            backends,
            storage: config.storage.clone(),
            deletion: config.deletion.clone(),
            temp: config.temp.clone(),
        }
    }

    /// Get the backends.
    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    fn quota(&self) -> QuotaReconciler<'_> {
        QuotaReconciler::new(self.backends.profiles.as_ref())
    }

    /// Apply a quota delta, turning drift into a warning.
    async fn reconcile(&self, owner: Uuid, delta: i64, errors: &mut ErrorLog) -> QuotaOutcome {
        let outcome = self.quota().apply_delta(owner, delta).await;
        if let Some(drift) = outcome.drift() {
            errors.record(
                DeletionErrorKind::QuotaUpdateFailed,
                "update_quota",
                format!(
                    "storage quota may be out of date ({}); contact support if this persists",
                    drift.reason
                ),
                None,
            );
        }
        outcome
    }

    /// Delete a node and its subtree, then release its bytes from the quota.
    pub async fn delete_node(&self, node_id: Uuid, owner: Uuid) -> Result<DeleteNodeResponse> {
        let deleter = TreeDeleter::new(self.backends.nodes.as_ref(), self.backends.blobs.as_ref())
            .with_limits(self.deletion.clone());
        let mut result = deleter.delete_subtree(node_id, owner).await?;

        // Bytes of removed descendants are gone even if the root stays.
        let quota = self
            .reconcile(owner, quota::freed(result.total_bytes_deleted), &mut result.errors)
            .await;

        let root_failure = result.errors.entries().iter().find(|e| {
            e.kind == DeletionErrorKind::MetadataDeletionFailed && e.node_id == Some(node_id)
        });
        if let Some(failure) = root_failure {
            return Err(StowError::MetadataDeletion {
                id: node_id,
                message: failure.message.clone(),
            });
        }

        let message = if result.root_deleted {
            "Item deleted successfully"
        } else {
            "Item partially deleted; some entries could not be removed"
        };
        info!(
            node = %node_id,
            owner = %owner,
            success = result.root_deleted,
            bytes = result.total_bytes_deleted,
            orphans = result.orphaned_blobs.len(),
            "Node deletion finished"
        );

        Ok(DeleteNodeResponse {
            success: result.root_deleted,
            message: message.to_string(),
            files_deleted: result.files_deleted,
            folders_deleted: result.folders_deleted,
            total_bytes_deleted: result.total_bytes_deleted,
            orphaned_objects: result.orphaned_blobs.len(),
            warnings: result.errors.warnings(),
            quota,
        })
    }

    /// Delete everything `owner` has stored. The profile is removed too.
    pub async fn delete_account(&self, owner: Uuid) -> AccountDeletionResult {
        AccountSweeper::new(
            self.backends.nodes.as_ref(),
            self.backends.temps.as_ref(),
            self.backends.blobs.as_ref(),
            self.backends.profiles.as_ref(),
            &self.storage,
        )
        .with_limits(self.deletion.clone())
        .delete_all_for_owner(owner)
        .await
    }

    /// Remove one temporary share's object and row.
    ///
    /// Returns whether the row was deleted by this call.
    async fn remove_temp_item(&self, item: &TempStorageItem, errors: &mut ErrorLog) -> Result<bool> {
        if let Some(locator) = item.blob() {
            match validation::check_blob_locator(locator, item.owner, &self.storage) {
                Ok(()) => {
                    if let Err(e) = self.backends.blobs.remove(&locator.bucket, &locator.key).await {
                        log_orphan(item.owner, Some(item.id), locator, &e);
                        errors.record(
                            DeletionErrorKind::BlobDeletionFailed,
                            "remove_temp_blob",
                            format!("failed to remove object {locator}: {e}"),
                            Some(item.id),
                        );
                    }
                }
                Err(reason) => errors.record(
                    DeletionErrorKind::InvalidBlobLocator,
                    "validate_blob_locator",
                    format!("object of {} not removed: {reason}", item.id),
                    Some(item.id),
                ),
            }
        }

        self.backends
            .temps
            .delete_by_id(item.id, item.owner)
            .await
            .map_err(|e| StowError::MetadataDeletion {
                id: item.id,
                message: e.to_string(),
            })
    }

    /// Delete a temporary share and release its bytes.
    pub async fn delete_temp_item(&self, id: Uuid, owner: Uuid) -> Result<DeleteTempResponse> {
        let item = self
            .backends
            .temps
            .get_by_id(id, owner)
            .await?
            .filter(|item| item.owner == owner)
            .ok_or_else(|| StowError::NotFound("temporary share".to_string()))?;

        let mut errors = ErrorLog::new();
        let deleted = self.remove_temp_item(&item, &mut errors).await?;
        let bytes_freed = if deleted { item.byte_size } else { 0 };
        let quota = self
            .reconcile(owner, quota::freed(bytes_freed), &mut errors)
            .await;

        info!(item = %id, owner = %owner, bytes = bytes_freed, "Temporary share deleted");
        Ok(DeleteTempResponse {
            success: true,
            message: "Temporary share deleted successfully".to_string(),
            items_deleted: u64::from(deleted),
            bytes_freed,
            warnings: errors.warnings(),
            quota,
        })
    }

    /// Delete the owner's shares that expired at or before `now`.
    pub async fn sweep_expired(&self, owner: Uuid, now: DateTime<Utc>) -> Result<DeleteTempResponse> {
        let batch_size = self.deletion.batch_size.max(1);
        let mut errors = ErrorLog::new();
        let mut failed = HashSet::new();
        let mut items_deleted = 0;
        let mut bytes_freed: u64 = 0;
        let mut pages = 0;

        loop {
            if pages >= self.deletion.max_iterations {
                errors.record(
                    DeletionErrorKind::IterationLimitReached,
                    "sweep_expired",
                    format!("stopped after {pages} pages of expired shares"),
                    None,
                );
                break;
            }
            pages += 1;

            let page = match self.backends.temps.list_expired(owner, now, batch_size).await {
                Ok(page) => page,
                // Nothing removed yet, so there is nothing to reconcile
                Err(e) if items_deleted == 0 => return Err(e),
                Err(e) => {
                    errors.record(
                        DeletionErrorKind::ListingFailed,
                        "list_expired",
                        format!("failed to list expired shares: {e}"),
                        None,
                    );
                    break;
                }
            };
            let fresh: Vec<&TempStorageItem> =
                page.iter().filter(|item| !failed.contains(&item.id)).collect();
            let progressed = !fresh.is_empty();
            for item in fresh {
                match self.remove_temp_item(item, &mut errors).await {
                    Ok(true) => {
                        items_deleted += 1;
                        bytes_freed = bytes_freed.saturating_add(item.byte_size);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        failed.insert(item.id);
                        errors.record(
                            DeletionErrorKind::MetadataDeletionFailed,
                            "delete_temp_item",
                            e.to_string(),
                            Some(item.id),
                        );
                    }
                }
            }

            if page.len() < batch_size || !progressed {
                break;
            }
        }

        let quota = self
            .reconcile(owner, quota::freed(bytes_freed), &mut errors)
            .await;

        info!(owner = %owner, items = items_deleted, bytes = bytes_freed, "Expired shares swept");
        Ok(DeleteTempResponse {
            success: !errors.has_critical(),
            message: format!("{items_deleted} expired shares deleted"),
            items_deleted,
            bytes_freed,
            warnings: errors.warnings(),
            quota,
        })
    }

    /// Ensure `parent` is a folder owned by `owner`.
    async fn require_folder(&self, parent: Uuid, owner: Uuid) -> Result<StorageNode> {
        let node = self
            .backends
            .nodes
            .get_by_id(parent, owner)
            .await?
            .filter(|node| node.owner == owner)
            .ok_or_else(|| StowError::NotFound("parent folder".to_string()))?;

        if !node.is_folder() {
            return Err(StowError::Validation("parent is not a folder".to_string()));
        }
        Ok(node)
    }

    /// Create a folder.
    pub async fn create_folder(
        &self,
        owner: Uuid,
        parent: Option<Uuid>,
        name: &str,
    ) -> Result<StorageNode> {
        let name = validation::validate_node_name(name)?;
        let mut new_node = NewNode::folder(owner, name);
        if let Some(parent) = parent {
            self.require_folder(parent, owner).await?;
            new_node = new_node.with_parent(parent);
        }

        self.backends.nodes.insert(&new_node).await
    }

    /// Store a file in the long-term tree.
    pub async fn upload_file(
        &self,
        owner: Uuid,
        request: &UploadRequest,
    ) -> Result<UploadResponse<StorageNode>> {
        let name = validation::validate_node_name(&request.name)?;
        let description = validation::normalize_description(request.description.as_deref())?;
        let size = request.content.len() as u64;
        validation::validate_content_size(size, self.storage.max_file_size_bytes())?;
        validation::validate_mime_type(&request.mime_type)?;
        let file_name = validation::sanitize_file_name(&request.file_name)?;

        if let Some(parent) = request.parent_id {
            self.require_folder(parent, owner).await?;
        }
        self.quota().check_upload(owner, size).await?;

        let locator = BlobLocator::new(
            self.storage.long_term_bucket.as_str(),
            validation::blob_key(owner, &file_name),
        );
        let mut new_node = NewNode::file(owner, name, size)
            .with_mime_type(request.mime_type.as_str())
            .with_blob(locator.clone());
        if let Some(parent) = request.parent_id {
            new_node = new_node.with_parent(parent);
        }
        if let Some(description) = description {
            new_node = new_node.with_description(description);
        }

        self.backends.blobs.put(&locator.bucket, &locator.key, &request.content).await?;
        let node = match self.backends.nodes.insert(&new_node).await {
            Ok(node) => node,
            Err(e) => {
                self.discard_upload(owner, &locator).await;
                return Err(e);
            }
        };

        let mut errors = ErrorLog::new();
        self.reconcile(owner, quota::consumed(size), &mut errors).await;

        info!(node = %node.id, owner = %owner, bytes = size, "File uploaded");
        Ok(UploadResponse {
            data: node,
            warnings: errors.warnings(),
        })
    }

    /// Store a file as a temporary share.
    pub async fn create_temp_file(
        &self,
        owner: Uuid,
        request: &TempFileRequest,
    ) -> Result<UploadResponse<TempStorageItem>> {
        let size = request.content.len() as u64;
        validation::validate_content_size(size, self.storage.max_file_size_bytes())?;
        validation::validate_mime_type(&request.mime_type)?;
        let file_name = validation::sanitize_file_name(&request.file_name)?;
        let duration = validation::validate_duration(request.duration_minutes, &self.temp)?;
        self.quota().check_upload(owner, size).await?;

        let locator = BlobLocator::new(
            self.storage.temp_bucket.as_str(),
            validation::blob_key(owner, &file_name),
        );
        let new_item = NewTempItem::blob(
            owner,
            file_name,
            request.mime_type.as_str(),
            size,
            Utc::now() + duration,
            locator.clone(),
        );

        self.backends.blobs.put(&locator.bucket, &locator.key, &request.content).await?;
        let item = match self.backends.temps.insert(&new_item).await {
            Ok(item) => item,
            Err(e) => {
                self.discard_upload(owner, &locator).await;
                return Err(e);
            }
        };

        let mut errors = ErrorLog::new();
        self.reconcile(owner, quota::consumed(size), &mut errors).await;

        info!(item = %item.id, owner = %owner, bytes = size, "Temporary file shared");
        Ok(UploadResponse {
            data: item,
            warnings: errors.warnings(),
        })
    }

    /// Store a text snippet as a temporary share.
    pub async fn create_temp_text(
        &self,
        owner: Uuid,
        text: &str,
        duration_minutes: i64,
    ) -> Result<UploadResponse<TempStorageItem>> {
        let size = text.len() as u64;
        validation::validate_content_size(size, self.storage.max_file_size_bytes())?;
        let duration = validation::validate_duration(duration_minutes, &self.temp)?;
        self.quota().check_upload(owner, size).await?;

        let item = self
            .backends
            .temps
            .insert(&NewTempItem::text(owner, text, Utc::now() + duration))
            .await?;

        let mut errors = ErrorLog::new();
        self.reconcile(owner, quota::consumed(size), &mut errors).await;

        info!(item = %item.id, owner = %owner, bytes = size, "Temporary text shared");
        Ok(UploadResponse {
            data: item,
            warnings: errors.warnings(),
        })
    }

    /// Current usage and limit of `owner`.
    pub async fn storage_used(&self, owner: Uuid) -> Result<Quota> {
        self.quota().current(owner).await
    }

    /// Remove an object whose metadata row could not be written.
    async fn discard_upload(&self, owner: Uuid, locator: &BlobLocator) {
        warn!(object = %locator, "Metadata insert failed; removing uploaded object");
        if let Err(e) = self.backends.blobs.remove(&locator.bucket, &locator.key).await {
            log_orphan(owner, None, locator, &e);
        }
    }
}
