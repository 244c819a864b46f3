//! Hierarchical cancellation.
//!
//! A `Scope` cancels every child derived from it when it is cancelled, or
//! when its own parent is. The pool binds every connection and background
//! task it owns to one scope; cancelling the scope is what tears the pool
//! down (section 5 of the design: "cancelling the session cancels the pool
//! cancels every RW teardown").
//!
//! Built on [`tokio_util::sync::CancellationToken`] rather than a
//! broadcast channel — a child token is a cheap, lock-free way to express
//! "cancelled if I am, or if my parent is", which is exactly the shape
//! this crate needs and the shape reached for by the other connection-pool
//! code in this workspace's lineage.

use tokio_util::sync::CancellationToken;

/// A node in the cancellation tree.
#[derive(Debug, Clone)]
pub struct Scope(CancellationToken);

impl Scope {
    /// Create a new root scope, cancelled by nothing but an explicit call
    /// to [`Scope::cancel`].
    pub fn root() -> Scope {
        Scope(CancellationToken::new())
    }

    /// Derive a child scope. Cancelling `self` cancels the child; the
    /// child can also be cancelled on its own without affecting `self` or
    /// any sibling.
    pub fn child(&self) -> Scope {
        Scope(self.0.child_token())
    }

    /// Cancel this scope and every descendant derived from it.
    pub fn cancel(&self) {
        self.0.cancel();
    }

    /// True once [`Scope::cancel`] has fired on this scope or an ancestor.
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once this scope (or an ancestor) is cancelled.
    pub async fn cancelled(&self) {
        self.0.cancelled().await;
    }
}
