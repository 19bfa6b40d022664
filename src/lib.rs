//! Cooperative, lease-based locking over an append-only record log.
//!
//! A lock is a stream of immutable [`LockRecord`]s. Every transition appends
//! the next version, and the [`RecordStore`] accepts it only if nobody else
//! appended first. A [`LockCoordinator`] acquires the lock and hands back a
//! [`Lease`], whose heartbeat keeps the version moving so waiters can tell a
//! live holder from a dead one.

mod cancel;
mod coordinator;
mod error;
mod lease;
mod record;
mod scheduler;
mod store;

pub use cancel::CancelToken;
pub use coordinator::{LockCoordinator, Options, OptionsConfig, TryAcquireOutcome};
pub use error::{LockError, LockResult};
pub use lease::{Lease, LeasePhase};
pub use record::{Actor, HistoricEntry, LockAction, LockRecord};
pub use scheduler::{
    tick_fn, IntervalScheduler, ManualScheduler, PeriodicScheduler, StopHandle, TickFn,
    TickFuture,
};
pub use store::{
    InMemoryLockLog, InMemoryRecordStore, RecordStore, StoreError, DEFAULT_LOCK_NAME,
    DEFAULT_MAX_COUNT,
};
