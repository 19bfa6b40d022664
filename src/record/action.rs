use std::fmt;

use serde::{Deserialize, Serialize};

/// A transition recorded in a lock's history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockAction {
    None,
    Acquired,
    Released,
    TimedOut,
    TakenOver,
    Cancelled,
}

impl LockAction {
    /// Whether a record ending in this action is free for a new holder.
    pub fn leaves_unlocked(self) -> bool {
        matches!(
            self,
            LockAction::None | LockAction::Released | LockAction::TimedOut | LockAction::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LockAction::None => "none",
            LockAction::Acquired => "acquired",
            LockAction::Released => "released",
            LockAction::TimedOut => "timed_out",
            LockAction::TakenOver => "taken_over",
            LockAction::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for LockAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_actions_do_not_leave_unlocked() {
        assert!(!LockAction::Acquired.leaves_unlocked());
        assert!(!LockAction::TakenOver.leaves_unlocked());
    }

    #[test]
    fn terminal_actions_leave_unlocked() {
        for action in [
            LockAction::None,
            LockAction::Released,
            LockAction::TimedOut,
            LockAction::Cancelled,
        ] {
            assert!(action.leaves_unlocked(), "{} should be acquirable", action);
        }
    }

    #[test]
    fn serializes_as_variant_name() {
        let json = serde_json::to_string(&LockAction::TakenOver).unwrap();
        assert_eq!(json, "\"TakenOver\"");
    }
}
