use async_trait::async_trait;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::record::LockRecord;

/// Error type for record store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Optimistic concurrency conflict: the stream moved on since it was read.
    #[error("concurrency conflict on lock {lock} (expected version {expected}, actual {actual})")]
    ConcurrencyConflict {
        lock: String,
        expected: i64,
        actual: i64,
    },
    #[error("store operation cancelled")]
    Cancelled,
    #[error("lock record serialization error: {0}")]
    Serde(String),
    #[error("lock storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serde(err.to_string())
    }
}

/// Append-only, compare-and-swap persistence for the records of one lock.
///
/// `save` must accept a record only when the stream's current version equals
/// `record.version - 1`. That single check is what makes acquisition safe
/// across processes.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Name of the lock this store persists, used in logs and errors.
    fn name(&self) -> &str;

    /// Latest record, or [`LockRecord::unlocked`] if nothing was written yet.
    async fn get(&self, ct: &CancelToken) -> Result<LockRecord, StoreError>;

    /// Append `record` if nobody else appended since `record.version - 1`.
    async fn save(&self, record: &LockRecord, ct: &CancelToken) -> Result<(), StoreError>;
}
