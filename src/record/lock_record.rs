use serde::{Deserialize, Serialize};

use super::{Actor, HistoricEntry, LockAction};

/// Immutable snapshot of a named lock.
///
/// `version` starts at `-1` for a lock that was never written and grows by
/// exactly one per write. Every derivation below returns the record that
/// should be appended next; the store rejects it if someone else appended
/// first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub version: i64,
    pub state: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoricEntry>,
}

impl LockRecord {
    /// The sentinel returned for a lock that has never been written.
    pub fn unlocked() -> Self {
        LockRecord {
            version: -1,
            state: None,
            history: Vec::new(),
        }
    }

    pub fn is_unlocked_sentinel(&self) -> bool {
        self.version == -1 && self.history.is_empty()
    }

    pub fn last_action(&self) -> Option<LockAction> {
        self.history.last().map(|entry| entry.action)
    }

    /// True when nobody currently holds the lock.
    pub fn can_acquire(&self) -> bool {
        self.last_action()
            .map(LockAction::leaves_unlocked)
            .unwrap_or(true)
    }

    pub fn actions(&self) -> Vec<LockAction> {
        self.history.iter().map(|entry| entry.action).collect()
    }

    pub fn acquired(&self, actor: &Actor, clear_history: bool) -> LockRecord {
        self.append(self.state.clone(), LockAction::Acquired, actor, clear_history)
    }

    /// Heartbeat: advance the version without touching state or history.
    ///
    /// A cleared renewal keeps a single `Acquired` entry so the record still
    /// reads as held.
    pub fn renewed(&self, actor: &Actor, clear_history: bool) -> LockRecord {
        if clear_history {
            return self.append(self.state.clone(), LockAction::Acquired, actor, true);
        }
        LockRecord {
            version: self.version + 1,
            state: self.state.clone(),
            history: self.history.clone(),
        }
    }

    pub fn with_progress(
        &self,
        state: impl Into<String>,
        actor: &Actor,
        clear_history: bool,
    ) -> LockRecord {
        self.append(Some(state.into()), LockAction::Acquired, actor, clear_history)
    }

    pub fn after_action(&self, action: LockAction, actor: &Actor, clear_history: bool) -> LockRecord {
        self.append(self.state.clone(), action, actor, clear_history)
    }

    pub fn taken_over(&self, actor: &Actor, clear_history: bool) -> LockRecord {
        self.append(self.state.clone(), LockAction::TakenOver, actor, clear_history)
    }

    fn append(
        &self,
        state: Option<String>,
        action: LockAction,
        actor: &Actor,
        clear_history: bool,
    ) -> LockRecord {
        let version = self.version + 1;
        let mut history = if clear_history {
            Vec::with_capacity(1)
        } else {
            let mut history = Vec::with_capacity(self.history.len() + 1);
            history.extend_from_slice(&self.history);
            history
        };
        history.push(HistoricEntry::new(version, state.clone(), action, actor));

        LockRecord {
            version,
            state,
            history,
        }
    }
}

impl Default for LockRecord {
    fn default() -> Self {
        Self::unlocked()
    }
}
