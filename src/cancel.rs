//! Cooperative cancellation shared between callers, schedulers and leases.
//!
//! A `CancelToken` is a cheap, clonable flag that can be awaited. Tokens form
//! a tree: cancelling a token cancels every child derived from it through
//! [`CancelToken::child_token`], but cancelling a child never touches its
//! parent. The lease uses this to link its install-cancelled signal to the
//! token its caller supplied.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;

#[derive(Clone)]
pub struct CancelToken {
    node: Arc<Node>,
}

struct Node {
    flag: watch::Sender<bool>,
    children: Mutex<Vec<Weak<Node>>>,
}

impl Node {
    fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Node {
            flag,
            children: Mutex::new(Vec::new()),
        }
    }

    fn cancel(&self) {
        // Flag first, then children: `child_token` checks the flag under the
        // children lock, so a child registered concurrently is never missed.
        if self.flag.send_replace(true) {
            return;
        }
        let children = match self.children.lock() {
            Ok(mut children) => std::mem::take(&mut *children),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }
}

impl CancelToken {
    /// A fresh, uncancelled root token.
    pub fn new() -> Self {
        CancelToken {
            node: Arc::new(Node::new()),
        }
    }

    /// Derive a token that is cancelled whenever `self` is.
    pub fn child_token(&self) -> CancelToken {
        let child = Arc::new(Node::new());
        let mut children = match self.node.children.lock() {
            Ok(children) => children,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.node.is_cancelled() {
            drop(children);
            child.cancel();
        } else {
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        CancelToken { node: child }
    }

    pub fn cancel(&self) {
        self.node.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.node.is_cancelled()
    }

    /// Resolves once the token (or any ancestor) is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.node.flag.subscribe();
        // The sender lives inside `self.node`, so the channel cannot close
        // while we wait on it.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
