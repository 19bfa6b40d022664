//! The versioned lock record and its append-only history.
//!
//! A `LockRecord` is never edited in place. Every transition derives a new
//! record with `version + 1` from the previous one, which is then appended to
//! the record store with an optimistic version check.

mod action;
mod actor;
mod history;
mod lock_record;

pub use action::LockAction;
pub use actor::Actor;
pub use history::HistoricEntry;
pub use lock_record::LockRecord;
