//! Property-style integration tests for invariants that only show up across
//! multiple concurrent acquirers sharing one store.

use std::borrow::Cow;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use doclock::{impl_lock_root, Error, KeySource, LockContext, MemoryStore, ScopeSource, Tunables};

mod common;

struct Order {
    id: u64,
}

impl_lock_root!(
    Order,
    class = "Order",
    scope = ScopeSource::Literal(Cow::Borrowed("Order")),
    key = KeySource::Derive(Arc::new(|o: &Order| o.id.to_string()))
);

#[derive(Clone, Copy)]
struct Interval {
    start: Instant,
    end: Instant,
}

fn overlaps(a: &Interval, b: &Interval) -> bool {
    a.start < b.end && b.start < a.end
}

#[async_std::test]
async fn mutual_exclusion_holds_across_concurrent_acquirers() {
    common::init_tracing();
    let store = MemoryStore::new();
    let held_intervals: Arc<Mutex<Vec<Interval>>> = Arc::new(Mutex::new(Vec::new()));

    let tunables = Tunables {
        max_retries: 50,
        first_retry_interval: Duration::from_millis(2),
        max_retry_interval: Duration::from_millis(10),
        max_lifetime: Duration::from_secs(60),
    };

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let held_intervals = held_intervals.clone();
        let tunables = tunables.clone();
        tasks.push(async_std::task::spawn(async move {
            let ctx = LockContext::new(store);
            let descriptor = Arc::new(
                doclock::Descriptor::<Order>::root(
                    "Order",
                    ScopeSource::Literal(Cow::Borrowed("Order")),
                    KeySource::Derive(Arc::new(|o: &Order| o.id.to_string())),
                )
                .unwrap()
                .with_tunables(tunables),
            );
            let target = descriptor.bind(Arc::new(Order { id: 1 }));

            let root = ctx.acquire(&target).await?;
            let start = Instant::now();
            async_std::task::sleep(Duration::from_millis(5)).await;
            let end = Instant::now();
            ctx.release(&root).await?;
            held_intervals.lock().unwrap().push(Interval { start, end });
            Ok::<(), Error>(())
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    let intervals = held_intervals.lock().unwrap();
    for i in 0..intervals.len() {
        for j in (i + 1)..intervals.len() {
            assert!(
                !overlaps(&intervals[i], &intervals[j]),
                "held intervals {i} and {j} overlapped: mutual exclusion violated"
            );
        }
    }
}

#[async_std::test]
async fn refcount_is_zero_or_absent_after_every_release_under_contention() {
    common::init_tracing();
    let store = MemoryStore::new();
    let tunables = Tunables {
        max_retries: 50,
        first_retry_interval: Duration::from_millis(1),
        max_retry_interval: Duration::from_millis(5),
        max_lifetime: Duration::from_secs(60),
    };

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        let tunables = tunables.clone();
        tasks.push(async_std::task::spawn(async move {
            let ctx = LockContext::new(store);
            let descriptor = Arc::new(
                doclock::Descriptor::<Order>::root(
                    "Order",
                    ScopeSource::Literal(Cow::Borrowed("Order")),
                    KeySource::Derive(Arc::new(|o: &Order| o.id.to_string())),
                )
                .unwrap()
                .with_tunables(tunables),
            );
            let target = descriptor.bind(Arc::new(Order { id: 9 }));
            let root = ctx.acquire(&target).await?;
            ctx.release(&root).await?;
            Ok::<(), Error>(())
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    // Every participant paired its own acquire with a release, so the
    // document should end up absent; if a release's garbage-collecting
    // delete lost a race with another acquire, the survivor leaves it at a
    // healthy refcount of 1 — never negative, never stuck above 1.
    match store.peek("Order", "9") {
        None => {}
        Some(doc) => assert!(doc.refcount == 0 || doc.refcount == 1),
    }
}

#[async_std::test]
async fn roll_back_on_timeout_restores_the_callers_nesting_count() {
    common::init_tracing();
    let store = MemoryStore::new();
    let holder = LockContext::new(store.clone());
    let order = Arc::new(Order { id: 5 });
    let held = holder.acquire(&order.lock_target()).await.unwrap();

    let contender = LockContext::new(store.clone());
    let descriptor = Arc::new(
        doclock::Descriptor::<Order>::root(
            "Order",
            ScopeSource::Literal(Cow::Borrowed("Order")),
            KeySource::Derive(Arc::new(|o: &Order| o.id.to_string())),
        )
        .unwrap()
        .with_tunables(Tunables {
            max_retries: 2,
            first_retry_interval: Duration::from_millis(1),
            max_retry_interval: Duration::from_millis(2),
            max_lifetime: Duration::from_secs(60),
        }),
    );
    let contender_target = descriptor.bind(Arc::new(Order { id: 5 }));

    assert!(!contender.holds(&contender_target).unwrap());
    let err = contender.acquire(&contender_target).await.unwrap_err();
    assert!(matches!(err, Error::LockTimeout { .. }));
    assert!(!contender.holds(&contender_target).unwrap());

    holder.release(&held).await.unwrap();
}
