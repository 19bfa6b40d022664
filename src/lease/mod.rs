//! The handle a process holds while it owns a lock.

mod lease;

use std::fmt;

pub use lease::Lease;

/// Where a lease is in its lifecycle. Every phase but `Held` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LeasePhase {
    /// Owned and renewing.
    Held,
    /// Given back through [`Lease::release`].
    Released,
    /// Not reported alive within the task timeout; a `Cancelled` entry was
    /// recorded.
    Expired,
    /// Another writer appended over this lease's record.
    Lost,
    /// `release` could not record the release. The heartbeat is stopped and
    /// the signal has fired; `release` may be retried.
    Abandoned,
}

impl LeasePhase {
    pub fn is_terminal(self) -> bool {
        self != LeasePhase::Held
    }
}

impl fmt::Display for LeasePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LeasePhase::Held => "held",
            LeasePhase::Released => "released",
            LeasePhase::Expired => "expired",
            LeasePhase::Lost => "lost",
            LeasePhase::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}
