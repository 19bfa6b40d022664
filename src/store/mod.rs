//! Persistence contract for lock records, plus an in-memory reference log.

mod in_memory;
mod store;

pub use in_memory::{InMemoryLockLog, InMemoryRecordStore, DEFAULT_LOCK_NAME, DEFAULT_MAX_COUNT};
pub use store::{RecordStore, StoreError};
