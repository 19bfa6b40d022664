use crate::lease::Lease;
use crate::record::LockRecord;

/// Result of a single, non-blocking acquisition attempt.
#[derive(Debug)]
pub enum TryAcquireOutcome {
    Acquired(Lease),
    /// Someone else holds the lock, or won the write race. Carries the record
    /// as last read.
    Held(LockRecord),
}

impl TryAcquireOutcome {
    pub fn acquired(&self) -> bool {
        matches!(self, TryAcquireOutcome::Acquired(_))
    }

    pub fn lease(&self) -> Option<&Lease> {
        match self {
            TryAcquireOutcome::Acquired(lease) => Some(lease),
            TryAcquireOutcome::Held(_) => None,
        }
    }

    pub fn into_lease(self) -> Option<Lease> {
        match self {
            TryAcquireOutcome::Acquired(lease) => Some(lease),
            TryAcquireOutcome::Held(_) => None,
        }
    }
}
