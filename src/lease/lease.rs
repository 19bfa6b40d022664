use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::LeasePhase;
use crate::cancel::CancelToken;
use crate::coordinator::Options;
use crate::error::{LockError, LockResult};
use crate::record::{Actor, LockAction, LockRecord};
use crate::scheduler::{tick_fn, PeriodicScheduler, StopHandle};
use crate::store::{RecordStore, StoreError};

/// Ownership of a lock, kept alive by a background heartbeat.
///
/// Every `refresh_interval` the lease appends a renewed record so waiters
/// can see the holder is alive. If the owner does not call
/// [`Lease::report_alive`] within `task_timeout`, the lease records a
/// `Cancelled` entry and fires [`Lease::install_cancelled`]; work done under
/// the lease must watch that token and stop when it fires.
///
/// Dropping or [disposing](Lease::dispose) a lease stops the heartbeat but
/// does not release the lock; such a record is taken over once waiters
/// have seen it unchanged for `db_timeout`. Only `dispose` waits for a tick
/// that is already running. Dropping just raises the stop flag, so a renewal
/// in flight at that moment may still land after the drop.
pub struct Lease {
    shared: Arc<Shared>,
    ticker: StopHandle,
}

struct Shared {
    store: Arc<dyn RecordStore>,
    actor: Actor,
    options: Options,
    install_cancelled: CancelToken,
    ticker: OnceLock<StopHandle>,
    inner: Mutex<Inner>,
}

/// Mutated only under `Shared::inner`, so heartbeats, progress reports and
/// release never interleave their writes.
struct Inner {
    record: LockRecord,
    elapsed: Duration,
    phase: LeasePhase,
}

impl Lease {
    /// Take ownership of `record`, which the caller has just written.
    pub(crate) fn start(
        store: Arc<dyn RecordStore>,
        scheduler: &dyn PeriodicScheduler,
        options: Options,
        actor: Actor,
        record: LockRecord,
        ct: &CancelToken,
    ) -> Lease {
        let shared = Arc::new(Shared {
            store,
            actor,
            options,
            install_cancelled: ct.child_token(),
            ticker: OnceLock::new(),
            inner: Mutex::new(Inner {
                record,
                elapsed: Duration::ZERO,
                phase: LeasePhase::Held,
            }),
        });

        let period = options.refresh_interval;
        let tick = {
            let shared = shared.clone();
            tick_fn(move |tick_ct| {
                let shared = shared.clone();
                async move { shared.tick(period, &tick_ct).await }
            })
        };
        let ticker = scheduler.schedule(period, tick, ct);
        // Ticks only start after a full period, so this is set before the
        // first one can read it.
        let _ = shared.ticker.set(ticker.clone());

        Lease { shared, ticker }
    }

    /// Prove the owner is still alive and optionally record progress.
    ///
    /// A successful report resets the expiry clock. With `Some(state)` the state is stored and an
    /// `Acquired` entry is appended; otherwise only the version advances.
    /// Fails without writing if `ct` is already cancelled or the lease has
    /// ended.
    pub async fn report_alive(
        &self,
        state: Option<&str>,
        ct: &CancelToken,
        clear_history: bool,
    ) -> LockResult<()> {
        if ct.is_cancelled() {
            return Err(LockError::Cancelled);
        }

        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if inner.phase.is_terminal() {
            return Err(LockError::LeaseEnded(inner.phase));
        }

        let next = match state.filter(|s| !s.is_empty()) {
            Some(state) => inner.record.with_progress(state, &shared.actor, clear_history),
            None => inner.record.renewed(&shared.actor, clear_history),
        };

        match shared.store.save(&next, ct).await {
            Ok(()) => {
                debug!(
                    lock = shared.store.name(),
                    version = next.version,
                    state = next.state.as_deref(),
                    "lease reported alive"
                );
                inner.elapsed = Duration::ZERO;
                inner.record = next;
                Ok(())
            }
            Err(err) => {
                if err.is_conflict() {
                    shared.lose(&mut inner, &err);
                }
                Err(err.into())
            }
        }
    }

    /// Give the lock back.
    ///
    /// Stops the heartbeat (waiting for an in-flight tick), appends a
    /// `Released` entry and fires the install-cancelled signal. Releasing a
    /// lease that already ended writes nothing.
    ///
    /// If the write fails for any reason other than a conflict, the lease is
    /// left [`Abandoned`](LeasePhase::Abandoned): it no longer renews, and a
    /// later `release` tries the write again.
    pub async fn release(&self, ct: &CancelToken, clear_history: bool) -> LockResult<()> {
        self.ticker.stop().await;

        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if inner.phase.is_terminal() && inner.phase != LeasePhase::Abandoned {
            debug!(
                lock = shared.store.name(),
                phase = %inner.phase,
                "release on an ended lease ignored"
            );
            shared.install_cancelled.cancel();
            return Ok(());
        }

        let released = inner
            .record
            .after_action(LockAction::Released, &shared.actor, clear_history);
        let result = shared.store.save(&released, ct).await;
        shared.install_cancelled.cancel();

        match result {
            Ok(()) => {
                info!(
                    lock = shared.store.name(),
                    version = released.version,
                    "lock released"
                );
                inner.record = released;
                inner.phase = LeasePhase::Released;
                Ok(())
            }
            Err(err) if err.is_conflict() => {
                shared.lose(&mut inner, &err);
                Err(err.into())
            }
            Err(err) => {
                inner.phase = LeasePhase::Abandoned;
                warn!(lock = shared.store.name(), error = %err, "failed to record release");
                Err(err.into())
            }
        }
    }

    /// Fires when work under this lease must stop: on expiry, on release, on
    /// losing the lock, or when the token passed at acquisition is cancelled.
    pub fn install_cancelled(&self) -> CancelToken {
        self.shared.install_cancelled.clone()
    }

    /// The last record this lease wrote.
    pub async fn current_record(&self) -> LockRecord {
        self.shared.inner.lock().await.record.clone()
    }

    pub async fn phase(&self) -> LeasePhase {
        self.shared.inner.lock().await.phase
    }

    /// Stop the heartbeat and wait for it, without releasing the lock.
    pub async fn dispose(self) {
        self.ticker.stop().await;
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        // Can't await here; the schedule skips any tick that has not started.
        self.ticker.signal();
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("lock", &self.shared.store.name())
            .field("ticking", &!self.ticker.is_stopped())
            .field("install_cancelled", &self.shared.install_cancelled.is_cancelled())
            .finish()
    }
}

impl Shared {
    async fn tick(&self, period: Duration, ct: &CancelToken) {
        let mut inner = self.inner.lock().await;
        if inner.phase.is_terminal() {
            return;
        }

        inner.elapsed += period;
        if inner.elapsed > self.options.task_timeout {
            self.expire(&mut inner, ct).await;
            return;
        }

        let renewed = inner.record.renewed(&self.actor, false);
        match self.store.save(&renewed, ct).await {
            Ok(()) => {
                debug!(
                    lock = self.store.name(),
                    version = renewed.version,
                    elapsed_ms = inner.elapsed.as_millis() as u64,
                    "lease renewed"
                );
                inner.record = renewed;
            }
            Err(err) if err.is_conflict() => self.lose(&mut inner, &err),
            Err(StoreError::Cancelled) => {
                debug!(lock = self.store.name(), "lease heartbeat cancelled");
            }
            Err(err) => {
                error!(lock = self.store.name(), error = %err, "lease heartbeat failed");
            }
        }
    }

    async fn expire(&self, inner: &mut Inner, ct: &CancelToken) {
        inner.phase = LeasePhase::Expired;
        self.install_cancelled.cancel();
        info!(
            lock = self.store.name(),
            timeout_ms = self.options.task_timeout.as_millis() as u64,
            "lease expired without a report, cancelling protected work"
        );

        let cancelled = inner
            .record
            .after_action(LockAction::Cancelled, &self.actor, false);
        match self.store.save(&cancelled, ct).await {
            Ok(()) => inner.record = cancelled,
            Err(err) => {
                warn!(lock = self.store.name(), error = %err, "failed to record lease expiry");
            }
        }
        self.stop_ticking();
    }

    fn lose(&self, inner: &mut Inner, err: &StoreError) {
        inner.phase = LeasePhase::Lost;
        self.install_cancelled.cancel();
        self.stop_ticking();
        warn!(lock = self.store.name(), error = %err, "lease lost to another writer");
    }

    fn stop_ticking(&self) {
        if let Some(ticker) = self.ticker.get() {
            ticker.signal();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use crate::store::InMemoryRecordStore;

    fn options() -> Options {
        Options::new(
            Duration::from_secs(1),
            Duration::from_secs(20),
            Duration::from_secs(60),
            false,
        )
        .unwrap()
    }

    async fn held_lease(
        store: &InMemoryRecordStore,
        scheduler: &ManualScheduler,
        ct: &CancelToken,
    ) -> Lease {
        let actor = Actor::new("host", "user");
        let record = LockRecord::unlocked().acquired(&actor, false);
        store.save(&record, ct).await.unwrap();
        Lease::start(Arc::new(store.clone()), scheduler, options(), actor, record, ct)
    }

    #[tokio::test]
    async fn heartbeat_advances_version_each_tick() {
        let store = InMemoryRecordStore::new();
        let scheduler = ManualScheduler::new();
        let ct = CancelToken::new();
        let lease = held_lease(&store, &scheduler, &ct).await;

        scheduler.advance(Duration::from_secs(3)).await;

        assert_eq!(store.get(&ct).await.unwrap().version, 3);
        assert_eq!(lease.current_record().await.version, 3);
        assert_eq!(lease.phase().await, LeasePhase::Held);
    }

    #[tokio::test]
    async fn expires_only_after_task_timeout_is_exceeded() {
        let store = InMemoryRecordStore::new();
        let scheduler = ManualScheduler::new();
        let ct = CancelToken::new();
        let lease = held_lease(&store, &scheduler, &ct).await;

        scheduler.advance(Duration::from_secs(20)).await;
        assert!(!lease.install_cancelled().is_cancelled());

        scheduler.advance(Duration::from_secs(1)).await;
        assert!(lease.install_cancelled().is_cancelled());
        assert_eq!(lease.phase().await, LeasePhase::Expired);
        assert_eq!(
            store.get(&ct).await.unwrap().last_action(),
            Some(LockAction::Cancelled)
        );
    }

    #[tokio::test]
    async fn expired_lease_stops_writing() {
        let store = InMemoryRecordStore::new();
        let scheduler = ManualScheduler::new();
        let ct = CancelToken::new();
        let _lease = held_lease(&store, &scheduler, &ct).await;

        scheduler.advance(Duration::from_secs(21)).await;
        let version = store.get(&ct).await.unwrap().version;
        scheduler.advance(Duration::from_secs(10)).await;

        assert_eq!(store.get(&ct).await.unwrap().version, version);
        assert_eq!(scheduler.scheduled(), 0);
    }

    #[tokio::test]
    async fn report_alive_resets_expiry() {
        let store = InMemoryRecordStore::new();
        let scheduler = ManualScheduler::new();
        let ct = CancelToken::new();
        let lease = held_lease(&store, &scheduler, &ct).await;

        for _ in 0..3 {
            scheduler.advance(Duration::from_secs(15)).await;
            lease.report_alive(None, &ct, false).await.unwrap();
        }

        assert!(!lease.install_cancelled().is_cancelled());
        assert_eq!(lease.phase().await, LeasePhase::Held);
    }

    #[tokio::test]
    async fn report_alive_with_state_records_progress() {
        let store = InMemoryRecordStore::new();
        let scheduler = ManualScheduler::new();
        let ct = CancelToken::new();
        let lease = held_lease(&store, &scheduler, &ct).await;

        lease.report_alive(Some("schema-v2"), &ct, false).await.unwrap();

        let record = store.get(&ct).await.unwrap();
        assert_eq!(record.state.as_deref(), Some("schema-v2"));
        assert_eq!(record.actions(), vec![LockAction::Acquired, LockAction::Acquired]);
    }

    #[tokio::test]
    async fn report_alive_with_empty_state_only_renews() {
        let store = InMemoryRecordStore::new();
        let scheduler = ManualScheduler::new();
        let ct = CancelToken::new();
        let lease = held_lease(&store, &scheduler, &ct).await;

        lease.report_alive(Some(""), &ct, false).await.unwrap();

        let record = store.get(&ct).await.unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.state, None);
        assert_eq!(record.actions(), vec![LockAction::Acquired]);
    }

    #[tokio::test]
    async fn report_alive_fails_fast_on_cancelled_token() {
        let store = InMemoryRecordStore::new();
        let scheduler = ManualScheduler::new();
        let ct = CancelToken::new();
        let lease = held_lease(&store, &scheduler, &ct).await;

        let cancelled = CancelToken::new();
        cancelled.cancel();

        let err = lease.report_alive(Some("x"), &cancelled, false).await.unwrap_err();
        assert_eq!(err, LockError::Cancelled);
        assert_eq!(store.get(&ct).await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn release_records_and_fires_signal() {
        let store = InMemoryRecordStore::new();
        let scheduler = ManualScheduler::new();
        let ct = CancelToken::new();
        let lease = held_lease(&store, &scheduler, &ct).await;

        lease.release(&ct, false).await.unwrap();

        assert!(lease.install_cancelled().is_cancelled());
        assert_eq!(lease.phase().await, LeasePhase::Released);
        let record = store.get(&ct).await.unwrap();
        assert_eq!(record.last_action(), Some(LockAction::Released));
        assert!(record.can_acquire());
        assert_eq!(scheduler.scheduled(), 0);
    }

    #[tokio::test]
    async fn release_twice_writes_once() {
        let store = InMemoryRecordStore::new();
        let scheduler = ManualScheduler::new();
        let ct = CancelToken::new();
        let lease = held_lease(&store, &scheduler, &ct).await;

        lease.release(&ct, false).await.unwrap();
        lease.release(&ct, false).await.unwrap();

        assert_eq!(store.get(&ct).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn report_alive_after_release_is_rejected() {
        let store = InMemoryRecordStore::new();
        let scheduler = ManualScheduler::new();
        let ct = CancelToken::new();
        let lease = held_lease(&store, &scheduler, &ct).await;

        lease.release(&ct, false).await.unwrap();
        let err = lease.report_alive(None, &ct, false).await.unwrap_err();

        assert_eq!(err, LockError::LeaseEnded(LeasePhase::Released));
    }

    #[tokio::test]
    async fn foreign_write_loses_the_lease() {
        let store = InMemoryRecordStore::new();
        let scheduler = ManualScheduler::new();
        let ct = CancelToken::new();
        let lease = held_lease(&store, &scheduler, &ct).await;

        let intruder = Actor::new("other", "user");
        let current = store.get(&ct).await.unwrap();
        store.save(&current.taken_over(&intruder, false), &ct).await.unwrap();

        scheduler.advance(Duration::from_secs(1)).await;

        assert_eq!(lease.phase().await, LeasePhase::Lost);
        assert!(lease.install_cancelled().is_cancelled());
        assert_eq!(
            store.get(&ct).await.unwrap().last_action(),
            Some(LockAction::TakenOver)
        );
    }

    #[tokio::test]
    async fn caller_cancellation_propagates_to_install_cancelled() {
        let store = InMemoryRecordStore::new();
        let scheduler = ManualScheduler::new();
        let ct = CancelToken::new();
        let lease = held_lease(&store, &scheduler, &ct).await;

        ct.cancel();

        assert!(lease.install_cancelled().is_cancelled());
        assert_eq!(scheduler.scheduled(), 0);
    }

    #[tokio::test]
    async fn dispose_stops_heartbeat_without_releasing() {
        let store = InMemoryRecordStore::new();
        let scheduler = ManualScheduler::new();
        let ct = CancelToken::new();
        let lease = held_lease(&store, &scheduler, &ct).await;

        scheduler.advance(Duration::from_secs(2)).await;
        lease.dispose().await;
        scheduler.advance(Duration::from_secs(5)).await;

        let record = store.get(&ct).await.unwrap();
        assert_eq!(record.version, 2);
        assert_eq!(record.last_action(), Some(LockAction::Acquired));
    }
}
