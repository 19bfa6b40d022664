use thiserror::Error;

use crate::lease::LeasePhase;
use crate::store::StoreError;

pub type LockResult<T> = Result<T, LockError>;

/// Errors surfaced by the coordinator and the lease.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// Another writer appended to the lock first.
    #[error("concurrent write detected for lock {lock} (expected version {expected}, got {actual})")]
    VersionConflict {
        lock: String,
        expected: i64,
        actual: i64,
    },

    #[error("invalid lock configuration: {0}")]
    Configuration(String),

    #[error("lock operation cancelled")]
    Cancelled,

    /// The lease already reached a terminal phase and may not write again.
    #[error("lease has ended ({0})")]
    LeaseEnded(LeasePhase),

    #[error("lock store failure: {0}")]
    Store(String),
}

impl LockError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, LockError::VersionConflict { .. })
    }
}

impl From<StoreError> for LockError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConcurrencyConflict {
                lock,
                expected,
                actual,
            } => LockError::VersionConflict {
                lock,
                expected,
                actual,
            },
            StoreError::Cancelled => LockError::Cancelled,
            other => LockError::Store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflict_maps_to_version_conflict() {
        let err: LockError = StoreError::ConcurrencyConflict {
            lock: "install".into(),
            expected: 3,
            actual: 4,
        }
        .into();
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "concurrent write detected for lock install (expected version 3, got 4)"
        );
    }

    #[test]
    fn store_cancellation_maps_to_cancelled() {
        let err: LockError = StoreError::Cancelled.into();
        assert_eq!(err, LockError::Cancelled);
    }

    #[test]
    fn other_store_failures_are_not_conflicts() {
        let err: LockError = StoreError::Storage("disk full".into()).into();
        assert!(!err.is_conflict());
        assert_eq!(err, LockError::Store("lock storage error: disk full".into()));
    }
}
