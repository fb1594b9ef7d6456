//! Global configuration, explicit rather than a module-level singleton.
//!
//! A single explicit context bundles the store handle and tunables rather
//! than a process-wide mutable singleton — callers construct one
//! [`LockContext`] per store they want to coordinate through and hand it to
//! [`crate::LockTarget`]-bearing call sites as any other dependency.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::guard::LockGuard;
use crate::store::Store;
use crate::target::LockTarget;
use crate::{engine, reentrancy, resolver};

#[derive(Default)]
struct Counters {
    acquisitions: AtomicU64,
    active: AtomicU64,
}

/// A point-in-time snapshot of a [`LockContext`]'s lock activity, read-only
/// introspection with no effect on acquisition behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stats {
    /// Total number of fresh (non-reentrant) store acquisitions this context
    /// has completed.
    pub acquisitions: u64,
    /// Number of root locks currently held through this context, i.e. roots
    /// with a positive re-entrancy count acquired via this context.
    pub active: u64,
}

/// The entry point for this crate: wraps a [`Store`] handle and exposes the
/// acquire/release/lock operations.
///
/// Cloning a `LockContext` is cheap — it shares the underlying store handle
/// — which is what lets [`LockGuard`]'s `Drop` fallback spawn a detached
/// release task holding its own copy.
#[derive(Clone)]
pub struct LockContext {
    store: Arc<dyn Store>,
    counters: Arc<Counters>,
}

impl LockContext {
    /// Builds a context around an already-constructed store. Establishing
    /// or pooling the connection behind `store` is the caller's concern —
    /// this crate only ever receives a resolved handle.
    pub fn new(store: impl Store + 'static) -> Self {
        Self {
            store: Arc::new(store),
            counters: Arc::new(Counters::default()),
        }
    }

    /// A snapshot of this context's acquisition activity.
    pub fn stats(&self) -> Stats {
        Stats {
            acquisitions: self.counters.acquisitions.load(Ordering::Relaxed),
            active: self.counters.active.load(Ordering::Relaxed),
        }
    }

    /// Resolves `target` to its root and acquires the cross-process lock,
    /// short-circuiting through the re-entrancy table when the calling
    /// thread already holds it. Returns the resolved root so the caller can
    /// release against it without re-resolving.
    pub async fn acquire(&self, target: &Arc<dyn LockTarget>) -> Result<Arc<dyn LockTarget>> {
        let root = resolver::root_for(target)?;
        let class = root.class_name();
        let key = root.key();

        let nesting = reentrancy::bump(class, &key);
        if nesting > 1 {
            tracing::debug!(class, key = %key, nesting, "re-using held lock, no store interaction");
            return Ok(root);
        }

        engine::acquire(self.store.as_ref(), &root).await?;
        self.counters.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.counters.active.fetch_add(1, Ordering::Relaxed);
        Ok(root)
    }

    /// Releases a lock previously acquired through [`Self::acquire`].
    /// `root` must be the value `acquire` returned (or an equivalent
    /// re-resolution of the same instance) — releasing against a
    /// non-root target would decrement the wrong key.
    pub async fn release(&self, root: &Arc<dyn LockTarget>) -> Result<()> {
        let class = root.class_name();
        let key = root.key();

        let nesting = reentrancy::drop_one(class, &key);
        if nesting > 0 {
            tracing::debug!(class, key = %key, nesting, "nested release, no store interaction");
            return Ok(());
        }

        engine::release(self.store.as_ref(), root).await?;
        self.counters.active.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    /// True iff the calling thread's re-entrancy count for `target`'s
    /// resolved root is positive.
    pub fn holds(&self, target: &Arc<dyn LockTarget>) -> Result<bool> {
        let root = resolver::root_for(target)?;
        Ok(reentrancy::count(root.class_name(), &root.key()) > 0)
    }

    /// Acquires `target` and returns a [`LockGuard`] whose `release` is the
    /// guaranteed-on-exit mechanism for the lock.
    pub async fn acquire_guard(&self, target: &Arc<dyn LockTarget>) -> Result<LockGuard> {
        let root = self.acquire(target).await?;
        Ok(LockGuard::new(self.clone(), root))
    }

    /// Acquires `target`, runs `body`, and releases on every exit —
    /// success, an `Err` from `body`, or a panic unwinding through `body`
    /// (handled by the guard's `Drop`, not by this function). On acquire
    /// failure, `body` never runs.
    pub async fn lock<F, Fut, T>(&self, target: &Arc<dyn LockTarget>, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.acquire_guard(target).await?;
        let result = body().await;
        guard.release().await?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::target::{Descriptor, KeySource, ScopeSource};
    use std::borrow::Cow;

    struct Order {
        id: u64,
    }

    fn target(id: u64) -> Arc<dyn LockTarget> {
        let descriptor = Arc::new(
            Descriptor::<Order>::root(
                "Order",
                ScopeSource::Literal(Cow::Borrowed("Order")),
                KeySource::Derive(Arc::new(|o: &Order| o.id.to_string())),
            )
            .unwrap(),
        );
        descriptor.bind(Arc::new(Order { id }))
    }

    #[async_std::test]
    async fn stats_count_fresh_acquisitions_not_reentrant_ones() {
        let ctx = LockContext::new(MemoryStore::new());
        let t = target(1);

        let outer = ctx.acquire(&t).await.unwrap();
        let inner = ctx.acquire(&t).await.unwrap();
        assert_eq!(ctx.stats(), Stats { acquisitions: 1, active: 1 });

        ctx.release(&inner).await.unwrap();
        assert_eq!(ctx.stats(), Stats { acquisitions: 1, active: 1 });
        ctx.release(&outer).await.unwrap();
        assert_eq!(ctx.stats(), Stats { acquisitions: 1, active: 0 });
    }

    #[async_std::test]
    async fn stats_accumulate_across_distinct_roots() {
        let ctx = LockContext::new(MemoryStore::new());
        let a = ctx.acquire(&target(1)).await.unwrap();
        let b = ctx.acquire(&target(2)).await.unwrap();
        assert_eq!(ctx.stats(), Stats { acquisitions: 2, active: 2 });
        ctx.release(&a).await.unwrap();
        ctx.release(&b).await.unwrap();
        assert_eq!(ctx.stats(), Stats { acquisitions: 2, active: 0 });
    }
}
