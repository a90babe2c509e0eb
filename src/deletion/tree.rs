//! Subtree deletion.
//!
//! The walk is a depth-first descent that deletes every child before its
//! parent. A crash or a failure in the middle therefore leaves a tree that is
//! missing some leaves, never a row whose parent is gone. Calling
//! [`TreeDeleter::delete_subtree`] again on the same root resumes the work.

use std::collections::HashSet;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::{debug, info};
use uuid::Uuid;

use super::log_orphan;
use super::report::{DeletionErrorKind, DeletionResult, ErrorLog};
use crate::config::DeletionConfig;
use crate::storage::{BlobStore, NodeKind, NodeStore, StorageNode};
use crate::{Result, StowError};

/// Deletes a node and everything below it.
pub struct TreeDeleter<'a> {
    nodes: &'a dyn NodeStore,
    blobs: &'a dyn BlobStore,
    limits: DeletionConfig,
}

/// How a listed child is handled.
enum Visit {
    /// Delete it.
    Fresh,
    /// Ignore it; it does not belong to this walk.
    Skip,
    /// It cannot be deleted, so its parent has to stay.
    Blocked,
}

/// State of one walk.
struct Walk {
    owner: Uuid,
    result: DeletionResult,
    /// Folders on the current path from the root.
    ancestors: HashSet<Uuid>,
    /// Same-owner rows this walk gave up on.
    stuck: HashSet<Uuid>,
    /// Rows of other owners already reported.
    foreign: HashSet<Uuid>,
}

impl Walk {
    fn new(owner: Uuid) -> Self {
        Self {
            owner,
            result: DeletionResult::default(),
            ancestors: HashSet::new(),
            stuck: HashSet::new(),
            foreign: HashSet::new(),
        }
    }

    fn errors(&mut self) -> &mut ErrorLog {
        &mut self.result.errors
    }

    fn classify(&mut self, child: &StorageNode) -> Visit {
        if self.foreign.contains(&child.id) {
            return Visit::Skip;
        }
        if self.stuck.contains(&child.id) {
            return Visit::Blocked;
        }
        if child.owner != self.owner {
            self.foreign.insert(child.id);
            self.errors().record(
                DeletionErrorKind::UnauthorizedChild,
                "list_children",
                format!("skipped child {} owned by another principal", child.id),
                Some(child.id),
            );
            return Visit::Skip;
        }
        if self.ancestors.contains(&child.id) {
            self.stuck.insert(child.id);
            self.errors().record(
                DeletionErrorKind::CycleDetected,
                "list_children",
                format!("folder {} is listed inside its own subtree", child.id),
                Some(child.id),
            );
            return Visit::Blocked;
        }
        Visit::Fresh
    }

    fn count_file(&mut self, file: &StorageNode) {
        self.result.files_deleted += 1;
        self.result.total_bytes_deleted = self
            .result
            .total_bytes_deleted
            .saturating_add(file.byte_size);
    }
}

impl<'a> TreeDeleter<'a> {
    /// Create a deleter with default limits.
    pub fn new(nodes: &'a dyn NodeStore, blobs: &'a dyn BlobStore) -> Self {
        Self {
            nodes,
            blobs,
            limits: DeletionConfig::default(),
        }
    }

    /// Use the given paging and depth limits.
    pub fn with_limits(mut self, limits: DeletionConfig) -> Self {
        self.limits = limits;
        self
    }

    /// Delete `root_id` and its whole subtree on behalf of `owner`.
    ///
    /// Fails with [`StowError::NotFound`] if the root does not exist or
    /// belongs to someone else. Everything else is recorded in the result.
    /// If the root row itself cannot be deleted, the result has
    /// `root_deleted == false` and a critical `MetadataDeletionFailed` entry
    /// for the root.
    pub async fn delete_subtree(&self, root_id: Uuid, owner: Uuid) -> Result<DeletionResult> {
        let root = self
            .nodes
            .get_by_id(root_id, owner)
            .await?
            .filter(|node| node.owner == owner)
            .ok_or_else(|| StowError::NotFound("node".to_string()))?;

        info!(root = %root.id, owner = %owner, kind = %root.kind, "Deleting subtree");
        let mut walk = Walk::new(owner);

        match root.kind {
            NodeKind::File => {
                self.remove_blobs(std::slice::from_ref(&root), &mut walk).await;
                walk.result.root_deleted = self.delete_root_row(&root, &mut walk).await;
            }
            NodeKind::Folder => {
                walk.ancestors.insert(root.id);
                let complete = self.delete_children(&root, 0, &mut walk).await;
                walk.ancestors.remove(&root.id);

                if complete {
                    walk.result.root_deleted = self.delete_root_row(&root, &mut walk).await;
                } else {
                    walk.errors().record(
                        DeletionErrorKind::SubtreeIncomplete,
                        "delete_folder",
                        format!("folder {} kept because part of its subtree remains", root.id),
                        Some(root.id),
                    );
                }
            }
        }

        let result = walk.result;
        info!(
            root = %root_id,
            files = result.files_deleted,
            folders = result.folders_deleted,
            bytes = result.total_bytes_deleted,
            errors = result.errors.len(),
            root_deleted = result.root_deleted,
            "Subtree deletion finished"
        );
        Ok(result)
    }

    /// Delete the root row. A row that is already gone counts as deleted.
    async fn delete_root_row(&self, root: &StorageNode, walk: &mut Walk) -> bool {
        match self.nodes.delete_by_id(root.id, walk.owner).await {
            Ok(true) => {
                match root.kind {
                    NodeKind::File => walk.count_file(root),
                    NodeKind::Folder => walk.result.folders_deleted += 1,
                }
                true
            }
            Ok(false) => {
                debug!(node = %root.id, "Root row already removed");
                true
            }
            Err(e) => {
                walk.errors().record_critical(
                    DeletionErrorKind::MetadataDeletionFailed,
                    "delete_root",
                    format!("failed to delete {} {}: {e}", root.kind, root.id),
                    Some(root.id),
                );
                false
            }
        }
    }

    /// Delete every child of `folder`, one page at a time.
    ///
    /// Returns `true` when no row of the owner is left under the folder.
    async fn delete_children(&self, folder: &StorageNode, depth: usize, walk: &mut Walk) -> bool {
        let batch_size = self.limits.batch_size.max(1);
        let mut complete = true;
        let mut pages = 0;

        loop {
            if pages >= self.limits.max_iterations {
                walk.errors().record(
                    DeletionErrorKind::IterationLimitReached,
                    "list_children",
                    format!("stopped after {pages} pages under folder {}", folder.id),
                    Some(folder.id),
                );
                return false;
            }
            pages += 1;

            let page = match self.nodes.list_children(folder.id, walk.owner, batch_size).await {
                Ok(page) => page,
                Err(e) => {
                    walk.errors().record(
                        DeletionErrorKind::ListingFailed,
                        "list_children",
                        format!("failed to list children of {}: {e}", folder.id),
                        Some(folder.id),
                    );
                    return false;
                }
            };
            let page_len = page.len();

            let mut files = Vec::new();
            let mut folders = Vec::new();
            for child in page {
                match walk.classify(&child) {
                    Visit::Fresh if child.is_file() => files.push(child),
                    Visit::Fresh => folders.push(child),
                    Visit::Skip => {}
                    Visit::Blocked => complete = false,
                }
            }
            let progressed = !files.is_empty() || !folders.is_empty();

            self.remove_blobs(&files, walk).await;
            for file in &files {
                if !self.delete_file_row(file, walk).await {
                    complete = false;
                }
            }
            for child in folders {
                if !self.delete_folder(child, depth + 1, walk).await {
                    complete = false;
                }
            }

            if page_len < batch_size {
                break;
            }
            if !progressed {
                // The whole page was rows already given up on; anything
                // beyond it cannot be reached by re-listing.
                complete = false;
                break;
            }
        }

        complete
    }

    /// Delete a folder below the root, children first.
    fn delete_folder<'w>(
        &'w self,
        folder: StorageNode,
        depth: usize,
        walk: &'w mut Walk,
    ) -> BoxFuture<'w, bool> {
        async move {
            if depth > self.limits.max_depth {
                walk.stuck.insert(folder.id);
                walk.errors().record(
                    DeletionErrorKind::MaxDepthExceeded,
                    "traverse",
                    format!(
                        "folder {} is deeper than {} levels; branch abandoned",
                        folder.id, self.limits.max_depth
                    ),
                    Some(folder.id),
                );
                return false;
            }

            walk.ancestors.insert(folder.id);
            let complete = self.delete_children(&folder, depth, walk).await;
            walk.ancestors.remove(&folder.id);

            if !complete {
                walk.stuck.insert(folder.id);
                walk.errors().record(
                    DeletionErrorKind::SubtreeIncomplete,
                    "delete_folder",
                    format!("folder {} kept because part of its subtree remains", folder.id),
                    Some(folder.id),
                );
                return false;
            }

            match self.nodes.delete_by_id(folder.id, walk.owner).await {
                Ok(true) => {
                    walk.result.folders_deleted += 1;
                    true
                }
                Ok(false) => {
                    debug!(node = %folder.id, "Folder row already removed");
                    true
                }
                Err(e) => {
                    walk.stuck.insert(folder.id);
                    walk.errors().record(
                        DeletionErrorKind::MetadataDeletionFailed,
                        "delete_folder",
                        format!("failed to delete folder {}: {e}", folder.id),
                        Some(folder.id),
                    );
                    false
                }
            }
        }
        .boxed()
    }

    async fn delete_file_row(&self, file: &StorageNode, walk: &mut Walk) -> bool {
        match self.nodes.delete_by_id(file.id, walk.owner).await {
            Ok(true) => {
                walk.count_file(file);
                true
            }
            Ok(false) => {
                debug!(node = %file.id, "File row already removed");
                true
            }
            Err(e) => {
                walk.stuck.insert(file.id);
                walk.errors().record(
                    DeletionErrorKind::MetadataDeletionFailed,
                    "delete_file",
                    format!("failed to delete file {}: {e}", file.id),
                    Some(file.id),
                );
                false
            }
        }
    }

    /// Remove the objects of `files` concurrently. Failures leave orphans.
    async fn remove_blobs(&self, files: &[StorageNode], walk: &mut Walk) {
        let removals = files.iter().filter_map(|file| {
            file.blob.as_ref().map(|locator| async move {
                let outcome = self.blobs.remove(&locator.bucket, &locator.key).await;
                (file, locator, outcome)
            })
        });

        for (file, locator, outcome) in join_all(removals).await {
            match outcome {
                Ok(true) => {}
                Ok(false) => debug!(node = %file.id, object = %locator, "Object already absent"),
                Err(e) => {
                    log_orphan(walk.owner, Some(file.id), locator, &e);
                    walk.errors().record(
                        DeletionErrorKind::BlobDeletionFailed,
                        "remove_blob",
                        format!("failed to remove object {locator} of file {}: {e}", file.id),
                        Some(file.id),
                    );
                    walk.result.orphaned_blobs.push(locator.clone());
                }
            }
        }
    }
}
