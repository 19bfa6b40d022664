mod coordinator;
mod options;
mod outcome;

pub use coordinator::LockCoordinator;
pub use options::{Options, OptionsConfig};
pub use outcome::TryAcquireOutcome;
