use std::time::Duration;

use serde::Deserialize;

use crate::error::LockError;

const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(90);
const DB_TIMEOUT_FACTOR: u32 = 3;

/// Timing and history policy for a [`LockCoordinator`](super::LockCoordinator).
///
/// Must satisfy `db_timeout > task_timeout > refresh_interval`; anything else
/// is rejected by [`Options::validate`], never clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// How often the lease heartbeat and the waiter's polling loop tick.
    pub refresh_interval: Duration,
    /// How long a lease survives without `report_alive` before it cancels
    /// itself.
    pub task_timeout: Duration,
    /// How long a held record must go without a new version before a waiter
    /// presumes the holder dead and takes over.
    pub db_timeout: Duration,
    /// Drop the accumulated history on every acquire.
    pub clear_history_on_acquire: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            db_timeout: DEFAULT_TASK_TIMEOUT * DB_TIMEOUT_FACTOR,
            clear_history_on_acquire: false,
        }
    }
}

impl Options {
    pub fn new(
        refresh_interval: Duration,
        task_timeout: Duration,
        db_timeout: Duration,
        clear_history_on_acquire: bool,
    ) -> Result<Self, LockError> {
        let options = Options {
            refresh_interval,
            task_timeout,
            db_timeout,
            clear_history_on_acquire,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set the task timeout. The db timeout follows at three times the task
    /// timeout unless it is set explicitly afterwards.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self.db_timeout = timeout * DB_TIMEOUT_FACTOR;
        self
    }

    pub fn with_db_timeout(mut self, timeout: Duration) -> Self {
        self.db_timeout = timeout;
        self
    }

    pub fn with_clear_history_on_acquire(mut self, clear: bool) -> Self {
        self.clear_history_on_acquire = clear;
        self
    }

    pub fn validate(&self) -> Result<(), LockError> {
        if self.refresh_interval.is_zero() {
            return Err(LockError::Configuration(
                "the refresh interval must be greater than zero".into(),
            ));
        }
        if self.db_timeout <= self.task_timeout {
            return Err(LockError::Configuration(format!(
                "the database timeout {:?} must be greater than the task timeout {:?}",
                self.db_timeout, self.task_timeout
            )));
        }
        if self.task_timeout <= self.refresh_interval {
            return Err(LockError::Configuration(format!(
                "the task timeout {:?} must be greater than the refresh interval {:?}",
                self.task_timeout, self.refresh_interval
            )));
        }
        Ok(())
    }
}

/// Deserializable mirror of [`Options`] for config files.
///
/// Durations are in milliseconds; missing fields take the defaults, with the
/// db timeout following the task timeout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptionsConfig {
    pub refresh_interval_ms: Option<u64>,
    pub task_timeout_ms: Option<u64>,
    pub db_timeout_ms: Option<u64>,
    pub clear_history_on_acquire: bool,
}

impl TryFrom<OptionsConfig> for Options {
    type Error = LockError;

    fn try_from(config: OptionsConfig) -> Result<Self, Self::Error> {
        let mut options = Options::default();
        if let Some(ms) = config.refresh_interval_ms {
            options = options.with_refresh_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = config.task_timeout_ms {
            options = options.with_task_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = config.db_timeout_ms {
            options = options.with_db_timeout(Duration::from_millis(ms));
        }
        options = options.with_clear_history_on_acquire(config.clear_history_on_acquire);
        options.validate()?;
        Ok(options)
    }
}
