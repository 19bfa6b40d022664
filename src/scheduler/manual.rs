//! Virtual-time scheduler for deterministic tests.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{PeriodicScheduler, StopHandle, TickFn};
use crate::cancel::CancelToken;

struct ManualTask {
    period: Duration,
    tick: TickFn,
    handle: StopHandle,
    since_last_tick: Mutex<Duration>,
}

impl ManualTask {
    /// Consume one period if the task is due.
    fn take_due(&self) -> bool {
        if self.period.is_zero() {
            return false;
        }
        let mut since = lock(&self.since_last_tick);
        if *since >= self.period {
            *since -= self.period;
            true
        } else {
            false
        }
    }
}

#[derive(Default)]
struct ManualState {
    tasks: Vec<Arc<ManualTask>>,
    now: Duration,
}

/// A scheduler whose clock only moves when [`ManualScheduler::advance`] is
/// called.
///
/// Ticks run inline inside `advance`, round-robin across schedules, so a
/// schedule that is due `n` times in the advanced window ticks `n` times.
/// Schedules created while `advance` is running start counting at the next
/// call. Clone-friendly (clones share the same clock and schedules).
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total virtual time advanced so far.
    pub fn now(&self) -> Duration {
        lock(&self.state).now
    }

    /// Number of schedules that are still live.
    pub fn scheduled(&self) -> usize {
        lock(&self.state)
            .tasks
            .iter()
            .filter(|task| !task.handle.is_stopped())
            .count()
    }

    /// Yield to other tasks until at least `count` schedules are live.
    ///
    /// Returns `false` if that never happened within a bounded number of
    /// yields.
    pub async fn wait_for_scheduled(&self, count: usize) -> bool {
        for _ in 0..1_000 {
            if self.scheduled() >= count {
                return true;
            }
            tokio::task::yield_now().await;
        }
        self.scheduled() >= count
    }

    /// Move the virtual clock forward, running every tick that falls due.
    pub async fn advance(&self, by: Duration) {
        let tasks = {
            let mut state = lock(&self.state);
            state.now += by;
            state.tasks.retain(|task| !task.handle.is_stopped());
            state.tasks.clone()
        };

        for task in &tasks {
            *lock(&task.since_last_tick) += by;
        }

        loop {
            let mut ticked = false;
            for task in &tasks {
                if task.handle.is_stopped() || !task.take_due() {
                    continue;
                }
                ticked = true;
                task.handle.run_tick(&task.tick).await;
            }
            if !ticked {
                break;
            }
        }
    }

    /// Advance in `step` increments until `total` has elapsed, yielding to
    /// other tasks between steps.
    pub async fn advance_in_steps(&self, total: Duration, step: Duration) {
        let mut remaining = total;
        while !remaining.is_zero() {
            let by = remaining.min(step);
            self.advance(by).await;
            remaining -= by;
            tokio::task::yield_now().await;
        }
    }
}

impl PeriodicScheduler for ManualScheduler {
    fn schedule(&self, period: Duration, tick: TickFn, cancel: &CancelToken) -> StopHandle {
        let handle = StopHandle::new(cancel);
        lock(&self.state).tasks.push(Arc::new(ManualTask {
            period,
            tick,
            handle: handle.clone(),
            since_last_tick: Mutex::new(Duration::ZERO),
        }));
        handle
    }
}
