//! Shared fixtures for the lock scenario tests.
//!
//! Every scenario runs on virtual time: a `ManualScheduler` drives both lease
//! heartbeats and waiter polling, and an `InMemoryLockLog` plays the store.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sourced_lock::{
    Actor, CancelToken, InMemoryLockLog, InMemoryRecordStore, LockCoordinator, LockError, LockRecord,
    ManualScheduler, Options, RecordStore, StoreError,
};

pub const LOCK: &str = "install";
pub const REFRESH: Duration = Duration::from_secs(1);
pub const TASK_TIMEOUT: Duration = Duration::from_secs(20);
pub const DB_TIMEOUT: Duration = Duration::from_secs(60);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn options() -> Options {
    Options::new(REFRESH, TASK_TIMEOUT, DB_TIMEOUT, false).unwrap()
}

pub struct Harness {
    pub log: InMemoryLockLog,
    pub scheduler: ManualScheduler,
    pub ct: CancelToken,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        Harness {
            log: InMemoryLockLog::new(),
            scheduler: ManualScheduler::new(),
            ct: CancelToken::new(),
        }
    }

    /// Keep every record so whole traces can be inspected.
    pub fn unbounded() -> Self {
        let mut harness = Self::new();
        harness.log = InMemoryLockLog::new().with_max_count(1_000);
        harness
    }

    pub fn store(&self) -> InMemoryRecordStore {
        self.log.store(LOCK)
    }

    /// A coordinator for a process on `host`, sharing this harness's log and
    /// clock.
    pub fn coordinator(&self, host: &str) -> LockCoordinator {
        self.coordinator_over(self.store(), host)
    }

    pub fn coordinator_over(&self, store: impl RecordStore + 'static, host: &str) -> LockCoordinator {
        LockCoordinator::with_scheduler(
            store,
            options(),
            Actor::new(host, "tester"),
            self.scheduler.clone(),
        )
        .unwrap()
    }

    pub fn records(&self) -> Vec<LockRecord> {
        self.log.records(LOCK).unwrap()
    }

    pub async fn latest(&self) -> LockRecord {
        self.store().get(&self.ct).await.unwrap()
    }

    /// Let spawned tasks run until they block again.
    pub async fn settle(&self) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }
}

/// A store where another process slips in an acquire just before our first
/// write lands.
pub struct RacingStore {
    inner: InMemoryRecordStore,
    rival: Actor,
    raced: AtomicBool,
}

impl RacingStore {
    pub fn new(inner: InMemoryRecordStore) -> Self {
        RacingStore {
            inner,
            rival: Actor::new("rival", "tester"),
            raced: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RecordStore for RacingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, ct: &CancelToken) -> Result<LockRecord, StoreError> {
        self.inner.get(ct).await
    }

    async fn save(&self, record: &LockRecord, ct: &CancelToken) -> Result<(), StoreError> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            let current = self.inner.get(ct).await?;
            self.inner.save(&current.acquired(&self.rival, false), ct).await?;
        }
        self.inner.save(record, ct).await
    }
}

/// A store whose reads or writes can be switched to fail, as if the backing
/// database went away. Clones share the switches.
#[derive(Clone)]
pub struct FlakyStore {
    inner: InMemoryRecordStore,
    fail_reads: Arc<AtomicBool>,
    fail_saves: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new(inner: InMemoryRecordStore) -> Self {
        FlakyStore {
            inner,
            fail_reads: Arc::new(AtomicBool::new(false)),
            fail_saves: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, ct: &CancelToken) -> Result<LockRecord, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("down".into()));
        }
        self.inner.get(ct).await
    }

    async fn save(&self, record: &LockRecord, ct: &CancelToken) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("down".into()));
        }
        self.inner.save(record, ct).await
    }
}

/// The error a `FlakyStore` failure surfaces as.
pub fn store_down() -> LockError {
    LockError::Store("lock storage error: down".into())
}
