#![deny(missing_docs)]
//! Distributed mutual exclusion, coordinated through a shared document
//! store that provides atomic per-document find-and-modify with optimistic
//! upsert.
//!
//! Three pieces form the algorithmic core:
//!
//!   - [`Store`] — three atomic primitives ([`Store::atomic_inc`],
//!     [`Store::atomic_set_expiry`], [`Store::atomic_delete`]) a real
//!     backing store implements against its native find-and-modify facility.
//!     [`MemoryStore`] is a reference implementation good enough to drive
//!     every test in this crate without a live database.
//!   - [`LockTarget`] — the lockable descriptor: a stable class identity, a
//!     derived `(scope, key)`, and an optional parent to resolve a root
//!     through. [`Descriptor`] is a small builder for assembling one without
//!     writing the trait by hand; [`impl_lock_root!`]/[`impl_lock_child!`]
//!     generate the boilerplate for a concrete type.
//!   - [`LockContext`] — the entry point. Wraps a [`Store`] and drives
//!     [`LockContext::acquire`]/[`LockContext::release`] (the retry-driven
//!     state machine with expiry recovery) and the ergonomic
//!     [`LockContext::lock`] closure frontend, which guarantees release on
//!     every exit path via [`LockGuard`]. [`LockContext::stats`] exposes
//!     read-only acquisition counters for observability.
//!
//! Locking always resolves to the *root* of an object subtree
//! ([`resolver::root_for`]): the whole subtree under a root shares one lock.
//! Within a single thread, nested acquisitions of the same key are
//! non-blocking and never touch the store — tracked by a thread-local
//! re-entrancy table (the `reentrancy` module).
//!
//! ```
//! # use doclock::*;
//! # use std::borrow::Cow;
//! # use std::sync::Arc;
//! struct Order {
//!     id: u64,
//! }
//!
//! impl_lock_root!(
//!     Order,
//!     class = "Order",
//!     scope = ScopeSource::Literal(Cow::Borrowed("Order")),
//!     key = KeySource::Derive(Arc::new(|o: &Order| o.id.to_string()))
//! );
//!
//! # async_std::task::block_on(async {
//! let ctx = LockContext::new(MemoryStore::new());
//! let order = Arc::new(Order { id: 1 });
//! let total = ctx
//!     .lock(&order.lock_target(), || async { Ok::<_, Error>(2 + 2) })
//!     .await?;
//! assert_eq!(total, 4);
//! # Ok::<(), Error>(())
//! # }).unwrap();
//! ```

mod context;
mod engine;
mod error;
mod guard;
mod reentrancy;
mod resolver;
mod store;
mod target;

pub use context::{LockContext, Stats};
pub use error::{Error, Result};
pub use guard::LockGuard;
pub use store::{LockDocument, LockQuery, MemoryStore, RefcountPredicate, Store};
pub use target::{Descriptor, KeySource, LockTarget, ScopeSource, Tunables};

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use std::sync::Arc;

    struct Order {
        id: u64,
    }

    impl_lock_root!(
        Order,
        class = "Order",
        scope = ScopeSource::Literal(Cow::Borrowed("Order")),
        key = KeySource::Derive(Arc::new(|o: &Order| o.id.to_string()))
    );

    struct OrderItem {
        order: Arc<Order>,
        line: u64,
    }

    impl_lock_child!(
        OrderItem,
        class = "OrderItem",
        key = KeySource::Derive(Arc::new(|i: &OrderItem| i.line.to_string())),
        parent = |i: &OrderItem| i.order.lock_target()
    );

    #[async_std::test]
    async fn nested_lock_on_same_thread_touches_the_store_once() {
        let store = MemoryStore::new();
        let ctx = LockContext::new(store.clone());
        let order = Arc::new(Order { id: 1 });
        let target = order.lock_target();

        let outer = ctx.acquire(&target).await.unwrap();
        assert_eq!(store.peek("Order", "1").unwrap().refcount, 1);

        let inner = ctx.acquire(&target).await.unwrap();
        assert_eq!(store.peek("Order", "1").unwrap().refcount, 1);

        ctx.release(&inner).await.unwrap();
        assert_eq!(store.peek("Order", "1").unwrap().refcount, 1);
        ctx.release(&outer).await.unwrap();
        assert!(store.peek("Order", "1").is_none());
    }

    #[async_std::test]
    async fn child_lock_resolves_and_competes_on_the_parent_key() {
        let ctx = LockContext::new(MemoryStore::new());
        let order = Arc::new(Order { id: 1 });
        let item = Arc::new(OrderItem {
            order: order.clone(),
            line: 7,
        });

        let root_from_child = ctx.acquire(&item.lock_target()).await.unwrap();
        assert_eq!(root_from_child.class_name(), "Order");
        assert_eq!(root_from_child.key(), "1");

        assert!(ctx.holds(&order.lock_target()).unwrap());
        ctx.release(&root_from_child).await.unwrap();
    }

    #[async_std::test]
    async fn distinct_roots_do_not_contend() {
        let ctx = LockContext::new(MemoryStore::new());
        let a = Arc::new(Order { id: 1 }).lock_target();
        let b = Arc::new(Order { id: 2 }).lock_target();

        let ra = ctx.acquire(&a).await.unwrap();
        let rb = ctx.acquire(&b).await.unwrap();
        ctx.release(&ra).await.unwrap();
        ctx.release(&rb).await.unwrap();
    }
}
