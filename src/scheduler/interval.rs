use std::time::Duration;

use super::{PeriodicScheduler, StopHandle, TickFn};
use crate::cancel::CancelToken;

/// Default scheduler backed by tokio timers.
///
/// Each schedule is a spawned task that sleeps `period`, runs the tick, and
/// repeats until stopped. Must be used from within a tokio runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct IntervalScheduler;

impl IntervalScheduler {
    pub fn new() -> Self {
        IntervalScheduler
    }
}

impl PeriodicScheduler for IntervalScheduler {
    fn schedule(&self, period: Duration, tick: TickFn, cancel: &CancelToken) -> StopHandle {
        let handle = StopHandle::new(cancel);
        let task = handle.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = task.stopped() => break,
                }
                if !task.run_tick(&tick).await {
                    break;
                }
            }
            tracing::trace!(period_ms = period.as_millis() as u64, "interval schedule finished");
        });

        handle
    }
}
