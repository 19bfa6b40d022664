//! Recurring background work.
//!
//! Both the lease heartbeat and the waiter's polling loop run through a
//! [`PeriodicScheduler`], so tests can swap real timers for the virtual-time
//! [`ManualScheduler`] and reproduce timeout scenarios deterministically.

mod interval;
mod manual;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancelToken;

pub use interval::IntervalScheduler;
pub use manual::ManualScheduler;

pub type TickFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The recurring callback. It receives a token that fires once the schedule
/// is stopped or the schedule's parent token is cancelled.
pub type TickFn = Arc<dyn Fn(CancelToken) -> TickFuture + Send + Sync>;

/// Wrap an async closure as a [`TickFn`].
pub fn tick_fn<F, Fut>(f: F) -> TickFn
where
    F: Fn(CancelToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ct: CancelToken| Box::pin(f(ct)) as TickFuture)
}

/// Runs a callback once every `period` until stopped or cancelled.
pub trait PeriodicScheduler: Send + Sync {
    fn schedule(&self, period: Duration, tick: TickFn, cancel: &CancelToken) -> StopHandle;
}

/// Handle to one schedule.
///
/// Ticks run while holding an internal gate, so [`StopHandle::stop`] can wait
/// for an in-flight tick, and a tick that starts after the stop flag was
/// raised is skipped.
#[derive(Clone)]
pub struct StopHandle {
    stopped: CancelToken,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl StopHandle {
    /// A handle whose stop flag is also raised when `cancel` fires.
    pub fn new(cancel: &CancelToken) -> Self {
        StopHandle {
            stopped: cancel.child_token(),
            gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Raise the stop flag without waiting. Safe to call from inside a tick.
    pub fn signal(&self) {
        self.stopped.cancel();
    }

    /// Raise the stop flag and wait for any in-flight tick to finish.
    ///
    /// Idempotent. Must not be awaited from inside this schedule's own tick.
    pub async fn stop(&self) {
        self.stopped.cancel();
        let _gate = self.gate.lock().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Resolves once the stop flag is raised.
    pub async fn stopped(&self) {
        self.stopped.cancelled().await
    }

    /// Run one tick unless the schedule was stopped. Returns `false` once the
    /// schedule is stopped, so driving loops can exit.
    pub async fn run_tick(&self, tick: &TickFn) -> bool {
        let _gate = self.gate.lock().await;
        if self.is_stopped() {
            return false;
        }
        tick(self.stopped.clone()).await;
        !self.is_stopped()
    }
}
