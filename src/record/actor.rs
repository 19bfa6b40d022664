use std::fmt;

use serde::{Deserialize, Serialize};

/// The process that performed a transition: which machine, which user.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub host: String,
    pub user: String,
}

impl Actor {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Actor {
            host: host.into(),
            user: user.into(),
        }
    }

    /// Resolve the current machine and user name.
    ///
    /// Falls back to `"unknown"` for either part that cannot be determined.
    pub fn from_environment() -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());

        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Actor { host, user }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}
