//! Deletion engine for Stowbox.
//!
//! - [`TreeDeleter`] removes one node and its subtree
//! - [`AccountSweeper`] removes everything an owner has stored
//!
//! Both record per-node problems in an [`ErrorLog`] instead of failing.

mod report;
mod sweep;
mod tree;

pub use report::{DeletionError, DeletionErrorKind, DeletionResult, ErrorLog, Warning};
pub use sweep::{AccountDeletionResult, AccountSweeper};
pub use tree::TreeDeleter;

use std::fmt;

use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use crate::logging::ORPHAN_TARGET;
use crate::storage::BlobLocator;

/// Log an object whose metadata is being deleted while the object stays.
///
/// These records feed out-of-band orphan cleanup.
pub(crate) fn log_orphan(
    owner: Uuid,
    item: Option<Uuid>,
    locator: &BlobLocator,
    reason: &dyn fmt::Display,
) {
    error!(
        target: ORPHAN_TARGET,
        owner = %owner,
        item = ?item,
        bucket = %locator.bucket,
        key = %locator.key,
        timestamp = %Utc::now().to_rfc3339(),
        reason = %reason,
        "Orphaned object left in blob store"
    );
}
