use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

use super::{Options, TryAcquireOutcome};
use crate::cancel::CancelToken;
use crate::error::{LockError, LockResult};
use crate::lease::Lease;
use crate::record::{Actor, LockAction, LockRecord};
use crate::scheduler::{tick_fn, IntervalScheduler, PeriodicScheduler};
use crate::store::{RecordStore, StoreError};

/// Acquires one named lock on behalf of one [`Actor`].
///
/// All coordination between processes goes through the store's versioned
/// append: whoever appends `version + 1` first owns the lock. Cloning is cheap
/// and clones share the store and scheduler.
#[derive(Clone)]
pub struct LockCoordinator {
    store: Arc<dyn RecordStore>,
    scheduler: Arc<dyn PeriodicScheduler>,
    options: Options,
    actor: Actor,
}

/// State of one `wait_until_acquired` polling loop.
struct Poll {
    observed_version: i64,
    elapsed: Duration,
    reply: Option<oneshot::Sender<LockResult<LockRecord>>>,
}

impl Poll {
    fn resolve(&mut self, result: LockResult<LockRecord>) {
        if let Some(reply) = self.reply.take() {
            // The waiter may already be gone after cancellation.
            let _ = reply.send(result);
        }
    }
}

impl LockCoordinator {
    /// A coordinator driven by real tokio timers.
    pub fn new(store: impl RecordStore + 'static, options: Options, actor: Actor) -> LockResult<Self> {
        Self::with_scheduler(store, options, actor, IntervalScheduler::new())
    }

    pub fn with_scheduler(
        store: impl RecordStore + 'static,
        options: Options,
        actor: Actor,
        scheduler: impl PeriodicScheduler + 'static,
    ) -> LockResult<Self> {
        options.validate()?;
        Ok(LockCoordinator {
            store: Arc::new(store),
            scheduler: Arc::new(scheduler),
            options,
            actor,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Single non-blocking attempt.
    ///
    /// Returns [`TryAcquireOutcome::Held`] when the lock is taken or another
    /// writer wins the race; only cancellation and store failures are errors.
    pub async fn try_acquire(
        &self,
        ct: &CancelToken,
        clear_history: bool,
    ) -> LockResult<TryAcquireOutcome> {
        if ct.is_cancelled() {
            return Err(LockError::Cancelled);
        }

        let current = self.store.get(ct).await?;
        if !current.can_acquire() {
            debug!(
                lock = self.store.name(),
                version = current.version,
                action = current.last_action().map(|action| action.as_str()),
                "lock is held"
            );
            return Ok(TryAcquireOutcome::Held(current));
        }

        let acquired = current.acquired(&self.actor, self.clear_history(clear_history));
        match self.store.save(&acquired, ct).await {
            Ok(()) => {
                info!(lock = self.store.name(), version = acquired.version, actor = %self.actor, "lock acquired");
                Ok(TryAcquireOutcome::Acquired(self.start_lease(acquired, ct)))
            }
            Err(err) if err.is_conflict() => {
                debug!(lock = self.store.name(), error = %err, "lost acquire race");
                let latest = self.store.get(ct).await?;
                Ok(TryAcquireOutcome::Held(latest))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Wait until this process owns the lock.
    ///
    /// Polls every `refresh_interval`. The lock is taken over once it is free,
    /// or once its version has stayed the same for longer than `db_timeout`.
    /// Only cancelling `ct` or a store failure ends the wait without a lease.
    pub async fn wait_until_acquired(
        &self,
        ct: &CancelToken,
        clear_history: bool,
    ) -> LockResult<Lease> {
        if ct.is_cancelled() {
            return Err(LockError::Cancelled);
        }

        let clear = self.clear_history(clear_history);
        let current = self.store.get(ct).await?;
        if current.can_acquire() {
            let acquired = current.acquired(&self.actor, clear);
            match self.store.save(&acquired, ct).await {
                Ok(()) => {
                    info!(lock = self.store.name(), version = acquired.version, actor = %self.actor, "lock acquired");
                    return Ok(self.start_lease(acquired, ct));
                }
                Err(err) if err.is_conflict() => {
                    debug!(lock = self.store.name(), error = %err, "lost acquire race, polling");
                }
                Err(err) => return Err(err.into()),
            }
        }

        let (reply, mut received) = oneshot::channel();
        let poll = Arc::new(Mutex::new(Poll {
            observed_version: current.version,
            elapsed: Duration::ZERO,
            reply: Some(reply),
        }));

        let tick = {
            let coordinator = self.clone();
            let poll = poll.clone();
            tick_fn(move |tick_ct| {
                let coordinator = coordinator.clone();
                let poll = poll.clone();
                async move { coordinator.poll_once(&poll, clear, &tick_ct).await }
            })
        };
        let polling = self
            .scheduler
            .schedule(self.options.refresh_interval, tick, ct);

        let result = tokio::select! {
            biased;
            _ = ct.cancelled() => Err(LockError::Cancelled),
            outcome = &mut received => outcome.unwrap_or(Err(LockError::Cancelled)),
        };
        polling.stop().await;

        if matches!(result, Err(LockError::Cancelled)) {
            if let Ok(Ok(record)) = received.try_recv() {
                self.abandon_takeover(record).await;
            }
        }

        let record = result?;
        Ok(self.start_lease(record, ct))
    }

    /// Latest record of the lock. No side effects.
    pub async fn current_state(&self, ct: &CancelToken) -> LockResult<LockRecord> {
        Ok(self.store.get(ct).await?)
    }

    fn clear_history(&self, requested: bool) -> bool {
        self.options.clear_history_on_acquire || requested
    }

    fn start_lease(&self, record: LockRecord, ct: &CancelToken) -> Lease {
        Lease::start(
            self.store.clone(),
            self.scheduler.as_ref(),
            self.options,
            self.actor.clone(),
            record,
            ct,
        )
    }

    async fn poll_once(&self, poll: &Mutex<Poll>, clear: bool, ct: &CancelToken) {
        let mut poll = poll.lock().await;
        if poll.reply.is_none() {
            return;
        }

        poll.elapsed += self.options.refresh_interval;
        let current = match self.store.get(ct).await {
            Ok(record) => record,
            Err(StoreError::Cancelled) => return,
            Err(err) => {
                error!(lock = self.store.name(), error = %err, "failed to read lock while waiting");
                poll.resolve(Err(err.into()));
                return;
            }
        };

        if current.version != poll.observed_version {
            poll.observed_version = current.version;
            poll.elapsed = Duration::ZERO;
        }

        let stale = poll.elapsed > self.options.db_timeout;
        if !current.can_acquire() && !stale {
            debug!(
                lock = self.store.name(),
                version = current.version,
                elapsed_ms = poll.elapsed.as_millis() as u64,
                "lock still held, waiting"
            );
            return;
        }

        let taken = current.taken_over(&self.actor, clear);
        match self.store.save(&taken, ct).await {
            Ok(()) => {
                info!(
                    lock = self.store.name(),
                    version = taken.version,
                    actor = %self.actor,
                    stale,
                    "lock taken over"
                );
                poll.resolve(Ok(taken));
            }
            Err(err) if err.is_conflict() => {
                // Retry on the next tick against a fresh read.
                debug!(lock = self.store.name(), error = %err, "lost takeover race");
            }
            Err(StoreError::Cancelled) => {}
            Err(err) => {
                error!(lock = self.store.name(), error = %err, "failed to take over lock");
                poll.resolve(Err(err.into()));
            }
        }
    }

    /// A takeover landed but the caller had already cancelled; give the lock
    /// back instead of leaving it to go stale.
    async fn abandon_takeover(&self, record: LockRecord) {
        let released = record.after_action(LockAction::Released, &self.actor, false);
        match self.store.save(&released, &CancelToken::new()).await {
            Ok(()) => info!(lock = self.store.name(), version = released.version, "released takeover after cancellation"),
            Err(err) => warn!(lock = self.store.name(), error = %err, "failed to release takeover after cancellation"),
        }
    }
}

impl fmt::Debug for LockCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("lock", &self.store.name())
            .field("options", &self.options)
            .field("actor", &self.actor)
            .finish()
    }
}
