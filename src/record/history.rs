use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Actor, LockAction};

/// One recorded transition of a lock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoricEntry {
    /// Version of the record this entry was written into.
    pub version: i64,
    /// Progress state at the time of the action.
    pub state: Option<String>,
    pub action: LockAction,
    pub at: DateTime<Utc>,
    pub actor: Actor,
}

impl HistoricEntry {
    /// Stamp an entry with the current UTC time.
    pub fn new(version: i64, state: Option<String>, action: LockAction, actor: &Actor) -> Self {
        HistoricEntry {
            version,
            state,
            action,
            at: Utc::now(),
            actor: actor.clone(),
        }
    }
}
