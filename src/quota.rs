//! Quota reconciliation.
//!
//! The per-owner `used` counter is denormalized: it should equal the sum of
//! the owner's live files and temporary shares. Every mutation adjusts it by
//! a delta after the fact. A failed adjustment never undoes the mutation;
//! it is logged on the drift target for manual reconciliation instead.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

use crate::logging::QUOTA_DRIFT_TARGET;
use crate::storage::{ProfileStore, Quota};
use crate::{Result, StowError};

/// Everything needed to repair a counter by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftRecord {
    /// Owner whose counter may be wrong.
    pub owner: Uuid,
    /// Counter value before the update, if it could be read.
    pub previous_used: Option<u64>,
    /// Requested change in bytes.
    pub delta: i64,
    /// Value that should have been written, if known.
    pub attempted_new_used: Option<u64>,
    /// When the update failed.
    pub timestamp: DateTime<Utc>,
    /// Why it failed.
    pub reason: String,
}

/// Result of [`QuotaReconciler::apply_delta`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaOutcome {
    /// Zero delta; nothing was read or written.
    Unchanged,
    /// The counter was updated.
    Applied {
        /// Value before the update.
        previous_used: u64,
        /// Value written.
        new_used: u64,
    },
    /// The counter could not be updated.
    Drifted(DriftRecord),
}

impl QuotaOutcome {
    /// Get the drift record, if the update failed.
    pub fn drift(&self) -> Option<&DriftRecord> {
        match self {
            QuotaOutcome::Drifted(record) => Some(record),
            _ => None,
        }
    }

    /// Check if the update failed.
    pub fn is_drifted(&self) -> bool {
        self.drift().is_some()
    }
}

/// Apply a signed delta to a counter, clamping at zero and `u64::MAX`.
pub fn clamp_used(used: u64, delta: i64) -> u64 {
    if delta < 0 {
        used.saturating_sub(delta.unsigned_abs())
    } else {
        used.saturating_add(delta as u64)
    }
}

/// Delta for bytes added to storage.
pub fn consumed(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

/// Delta for bytes released from storage.
pub fn freed(bytes: u64) -> i64 {
    -consumed(bytes)
}

/// Adjusts and checks per-owner quotas.
pub struct QuotaReconciler<'a> {
    profiles: &'a dyn ProfileStore,
}

impl<'a> QuotaReconciler<'a> {
    /// Create a reconciler over the given profile store.
    pub fn new(profiles: &'a dyn ProfileStore) -> Self {
        Self { profiles }
    }

    /// Add `delta` bytes to the owner's counter, never going below zero.
    ///
    /// Never fails; a read or write problem is returned as
    /// [`QuotaOutcome::Drifted`] and logged as critical.
    pub async fn apply_delta(&self, owner: Uuid, delta: i64) -> QuotaOutcome {
        if delta == 0 {
            return QuotaOutcome::Unchanged;
        }

        let previous_used = match self.profiles.get_quota(owner).await {
            Ok(Some(quota)) => quota.used,
            Ok(None) => return drifted(owner, None, delta, None, "profile not found".to_string()),
            Err(e) => {
                return drifted(owner, None, delta, None, format!("failed to read quota: {e}"))
            }
        };

        let new_used = clamp_used(previous_used, delta);
        match self.profiles.set_used(owner, new_used).await {
            Ok(()) => {
                debug!(owner = %owner, previous_used, new_used, delta, "Quota updated");
                QuotaOutcome::Applied {
                    previous_used,
                    new_used,
                }
            }
            Err(e) => drifted(
                owner,
                Some(previous_used),
                delta,
                Some(new_used),
                format!("failed to write quota: {e}"),
            ),
        }
    }

    /// Check that `incoming` more bytes fit under the owner's limit.
    ///
    /// Must run before anything is stored.
    pub async fn check_upload(&self, owner: Uuid, incoming: u64) -> Result<Quota> {
        let quota = self.current(owner).await?;

        if let Some(limit) = quota.limit {
            if quota.would_exceed(incoming) {
                return Err(StowError::QuotaExceeded {
                    required: incoming,
                    available: quota.available().unwrap_or(0),
                    limit,
                });
            }
        }
        Ok(quota)
    }

    /// Read the owner's quota.
    pub async fn current(&self, owner: Uuid) -> Result<Quota> {
        self.profiles
            .get_quota(owner)
            .await?
            .ok_or_else(|| StowError::NotFound("profile".to_string()))
    }
}

fn drifted(
    owner: Uuid,
    previous_used: Option<u64>,
    delta: i64,
    attempted_new_used: Option<u64>,
    reason: String,
) -> QuotaOutcome {
    let record = DriftRecord {
        owner,
        previous_used,
        delta,
        attempted_new_used,
        timestamp: Utc::now(),
        reason,
    };
    error!(
        target: QUOTA_DRIFT_TARGET,
        owner = %record.owner,
        previous_used = ?record.previous_used,
        delta = record.delta,
        attempted_new_used = ?record.attempted_new_used,
        timestamp = %record.timestamp.to_rfc3339(),
        reason = %record.reason,
        "CRITICAL: storage quota not updated; manual reconciliation required"
    );
    QuotaOutcome::Drifted(record)
}
