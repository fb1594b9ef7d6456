//! The closure frontend: acquiring, running a body, and releasing.
//!
//! `LockGuard` is the RAII value backing the "release on every exit path"
//! contract. Because [`crate::LockContext::release`] is async and `Drop`
//! cannot `.await`, the expected path is the explicit, consuming
//! [`LockGuard::release`]; `Drop` is only the safety net for the path that
//! never reaches it — most notably a panic unwinding through a still-live
//! `guard` binding, which is exactly the path Rust's stack unwinding already
//! guarantees runs `Drop`.

use std::sync::Arc;

use crate::target::LockTarget;
use crate::LockContext;

/// Holds a lock acquired through [`LockContext::acquire_guard`] until
/// explicitly released. Dropping it without calling [`LockGuard::release`]
/// still releases the lock — by spawning a detached task — but that path
/// exists only to cover panics; the ergonomic [`LockContext::lock`] always
/// calls `release` explicitly on every normal exit.
pub struct LockGuard {
    context: LockContext,
    root: Option<Arc<dyn LockTarget>>,
}

impl LockGuard {
    pub(crate) fn new(context: LockContext, root: Arc<dyn LockTarget>) -> Self {
        Self {
            context,
            root: Some(root),
        }
    }

    /// The root lock target this guard holds.
    pub fn target(&self) -> &Arc<dyn LockTarget> {
        self.root.as_ref().expect("guard not yet released")
    }

    /// Releases the lock, consuming the guard. This is the expected exit
    /// path; `Drop` only runs the equivalent work if a caller never reaches
    /// this call (e.g. a panic unwinding through a live `guard`).
    pub async fn release(mut self) -> crate::error::Result<()> {
        let root = self.root.take().expect("guard released exactly once");
        self.context.release(&root).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(root) = self.root.take() else {
            return;
        };
        let context = self.context.clone();
        async_std::task::spawn(async move {
            if let Err(err) = context.release(&root).await {
                tracing::error!(error = %err, "lock guard drop-release failed");
            }
        });
    }
}
