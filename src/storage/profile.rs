//! Per-owner quota counter.

use serde::Serialize;

/// Storage usage and limit of one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    /// Bytes currently recorded as used.
    pub used: u64,
    /// Maximum bytes (None = unlimited).
    pub limit: Option<u64>,
}

impl Quota {
    /// Create a quota.
    pub fn new(used: u64, limit: Option<u64>) -> Self {
        Self { used, limit }
    }

    /// Bytes still free under the limit (None when unlimited).
    pub fn available(&self) -> Option<u64> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }

    /// Check whether storing `incoming` more bytes would pass the limit.
    pub fn would_exceed(&self, incoming: u64) -> bool {
        match self.limit {
            None => false,
            Some(limit) => self.used.saturating_add(incoming) > limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_exceeds() {
        let quota = Quota::new(u64::MAX - 1, None);
        assert!(!quota.would_exceed(u64::MAX));
        assert_eq!(quota.available(), None);
    }

    #[test]
    fn test_would_exceed_boundary() {
        let quota = Quota::new(900, Some(1000));
        assert!(!quota.would_exceed(100));
        assert!(quota.would_exceed(101));
        assert_eq!(quota.available(), Some(100));
    }

    #[test]
    fn test_available_when_over_limit() {
        let quota = Quota::new(1500, Some(1000));
        assert_eq!(quota.available(), Some(0));
    }
}
