//! InMemoryLockLog - HashMap-backed append-only streams for testing and
//! single-process use.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{RecordStore, StoreError};
use crate::cancel::CancelToken;
use crate::record::LockRecord;

/// Stream name used when none is given.
pub const DEFAULT_LOCK_NAME: &str = "locking";

/// How many records each stream retains.
pub const DEFAULT_MAX_COUNT: usize = 5;

/// Internal stored representation of one appended record.
struct StoredRecord {
    version: i64,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct Stream {
    records: VecDeque<StoredRecord>,
}

impl Stream {
    fn current_version(&self) -> i64 {
        self.records.back().map(|r| r.version).unwrap_or(-1)
    }
}

/// Shared in-memory log holding one append-only stream per lock name.
///
/// Clone-friendly (cloning shares the same underlying streams). Records are
/// stored as JSON documents and only the newest `max_count` are retained.
#[derive(Clone)]
pub struct InMemoryLockLog {
    streams: Arc<RwLock<HashMap<String, Stream>>>,
    max_count: usize,
}

impl Default for InMemoryLockLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLockLog {
    pub fn new() -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
            max_count: DEFAULT_MAX_COUNT,
        }
    }

    /// Set how many records each stream keeps. Values below one are treated
    /// as one, since the latest record must always survive.
    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = max_count.max(1);
        self
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// A store bound to the stream `name`.
    pub fn store(&self, name: impl Into<String>) -> InMemoryRecordStore {
        InMemoryRecordStore {
            log: self.clone(),
            name: name.into(),
        }
    }

    /// Retained records of a stream, oldest first.
    pub fn records(&self, name: &str) -> Result<Vec<LockRecord>, StoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))?;

        match streams.get(name) {
            Some(stream) => stream
                .records
                .iter()
                .map(|stored| {
                    serde_json::from_slice::<LockRecord>(&stored.bytes).map_err(StoreError::from)
                })
                .collect(),
            None => Ok(Vec::new()),
        }
    }

    fn latest(&self, name: &str) -> Result<LockRecord, StoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))?;

        match streams.get(name).and_then(|s| s.records.back()) {
            Some(stored) => Ok(serde_json::from_slice::<LockRecord>(&stored.bytes)?),
            None => Ok(LockRecord::unlocked()),
        }
    }

    fn append(&self, name: &str, record: &LockRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;

        let mut streams = self
            .streams
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))?;

        let stream = streams.entry(name.to_string()).or_default();
        let expected = record.version - 1;
        let actual = stream.current_version();
        if actual != expected {
            return Err(StoreError::ConcurrencyConflict {
                lock: name.to_string(),
                expected,
                actual,
            });
        }

        stream.records.push_back(StoredRecord {
            version: record.version,
            bytes,
        });
        while stream.records.len() > self.max_count {
            stream.records.pop_front();
        }

        Ok(())
    }
}

/// [`RecordStore`] over one named stream of an [`InMemoryLockLog`].
#[derive(Clone)]
pub struct InMemoryRecordStore {
    log: InMemoryLockLog,
    name: String,
}

impl InMemoryRecordStore {
    /// A store over a fresh private log, using [`DEFAULT_LOCK_NAME`].
    pub fn new() -> Self {
        InMemoryLockLog::new().store(DEFAULT_LOCK_NAME)
    }

    /// Retained records of this stream, oldest first.
    pub fn records(&self) -> Result<Vec<LockRecord>, StoreError> {
        self.log.records(&self.name)
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, ct: &CancelToken) -> Result<LockRecord, StoreError> {
        if ct.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        self.log.latest(&self.name)
    }

    async fn save(&self, record: &LockRecord, ct: &CancelToken) -> Result<(), StoreError> {
        if ct.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        self.log.append(&self.name, record)
    }
}
