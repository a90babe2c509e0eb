//! Per-node error accounting for deletion runs.

use std::fmt;

use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::storage::BlobLocator;

/// What went wrong with a single node or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeletionErrorKind {
    /// A listed child belongs to another owner and was skipped.
    UnauthorizedChild,
    /// A branch was abandoned past the depth ceiling.
    MaxDepthExceeded,
    /// A folder appeared inside its own subtree.
    CycleDetected,
    /// A folder was kept because part of its subtree remains.
    SubtreeIncomplete,
    /// An object could not be removed; its metadata was deleted anyway.
    BlobDeletionFailed,
    /// A metadata row could not be deleted.
    MetadataDeletionFailed,
    /// The quota counter was not updated.
    QuotaUpdateFailed,
    /// Children or files could not be listed.
    ListingFailed,
    /// The page ceiling was reached before the listing was exhausted.
    IterationLimitReached,
    /// A stored locator points outside the owner's allowed area.
    InvalidBlobLocator,
    /// Final removal of an account's remaining rows failed.
    CleanupFailed,
}

impl DeletionErrorKind {
    /// Get the kind's name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionErrorKind::UnauthorizedChild => "UnauthorizedChild",
            DeletionErrorKind::MaxDepthExceeded => "MaxDepthExceeded",
            DeletionErrorKind::CycleDetected => "CycleDetected",
            DeletionErrorKind::SubtreeIncomplete => "SubtreeIncomplete",
            DeletionErrorKind::BlobDeletionFailed => "BlobDeletionFailed",
            DeletionErrorKind::MetadataDeletionFailed => "MetadataDeletionFailed",
            DeletionErrorKind::QuotaUpdateFailed => "QuotaUpdateFailed",
            DeletionErrorKind::ListingFailed => "ListingFailed",
            DeletionErrorKind::IterationLimitReached => "IterationLimitReached",
            DeletionErrorKind::InvalidBlobLocator => "InvalidBlobLocator",
            DeletionErrorKind::CleanupFailed => "CleanupFailed",
        }
    }

    /// Whether errors of this kind are critical unless stated otherwise.
    pub fn is_critical_by_default(&self) -> bool {
        matches!(
            self,
            DeletionErrorKind::QuotaUpdateFailed | DeletionErrorKind::IterationLimitReached
        )
    }
}

impl fmt::Display for DeletionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recorded problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionError {
    /// Error kind.
    pub kind: DeletionErrorKind,
    /// Step that failed, e.g. `list_children`.
    pub step: String,
    /// Human-readable detail.
    pub message: String,
    /// Whether the run should be reported as failed.
    pub critical: bool,
    /// Node or item concerned, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<Uuid>,
}

/// Accumulator of per-node errors, threaded through a run by `&mut`.
///
/// Every entry is logged as it is recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ErrorLog {
    entries: Vec<DeletionError>,
}

impl ErrorLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error with the kind's default criticality.
    pub fn record(
        &mut self,
        kind: DeletionErrorKind,
        step: &str,
        message: impl Into<String>,
        node_id: Option<Uuid>,
    ) {
        self.push(DeletionError {
            kind,
            step: step.to_string(),
            message: message.into(),
            critical: kind.is_critical_by_default(),
            node_id,
        });
    }

    /// Record an error that is always critical.
    pub fn record_critical(
        &mut self,
        kind: DeletionErrorKind,
        step: &str,
        message: impl Into<String>,
        node_id: Option<Uuid>,
    ) {
        self.push(DeletionError {
            kind,
            step: step.to_string(),
            message: message.into(),
            critical: true,
            node_id,
        });
    }

    /// Append an entry.
    pub fn push(&mut self, entry: DeletionError) {
        if entry.critical {
            error!(kind = %entry.kind, step = %entry.step, node = ?entry.node_id, "{}", entry.message);
        } else {
            warn!(kind = %entry.kind, step = %entry.step, node = ?entry.node_id, "{}", entry.message);
        }
        self.entries.push(entry);
    }

    /// All entries in recording order.
    pub fn entries(&self) -> &[DeletionError] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if any entry is critical.
    pub fn has_critical(&self) -> bool {
        self.entries.iter().any(|e| e.critical)
    }

    /// Number of entries of a kind.
    pub fn count(&self, kind: DeletionErrorKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    /// Convert entries into response warnings.
    pub fn warnings(&self) -> Vec<Warning> {
        self.entries.iter().map(Warning::from).collect()
    }
}

/// Client-facing form of a [`DeletionError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    /// Error kind.
    pub kind: DeletionErrorKind,
    /// Failed step.
    pub step: String,
    /// Detail.
    pub message: String,
}

impl From<&DeletionError> for Warning {
    fn from(error: &DeletionError) -> Self {
        Self {
            kind: error.kind,
            step: error.step.clone(),
            message: error.message.clone(),
        }
    }
}

/// Outcome of a subtree deletion.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionResult {
    /// File rows removed by this run.
    pub files_deleted: u64,
    /// Folder rows removed by this run (including the root).
    pub folders_deleted: u64,
    /// Sum of the sizes of removed file rows.
    pub total_bytes_deleted: u64,
    /// Whether the requested root no longer exists.
    pub root_deleted: bool,
    /// Problems encountered along the way.
    pub errors: ErrorLog,
    /// Objects left behind after their metadata was deleted.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub orphaned_blobs: Vec<BlobLocator>,
}

impl DeletionResult {
    /// Check if the run recorded any critical error.
    pub fn has_critical(&self) -> bool {
        self.errors.has_critical()
    }
}
