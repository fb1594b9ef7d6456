//! The acquire/release state machine.
//!
//! This is the only module that talks to the [`Store`]. Everything here is
//! driven by [`crate::LockContext::acquire`]/[`crate::LockContext::release`],
//! which first resolve the caller's target to its root via
//! [`crate::resolver::root_for`] and consult the re-entrancy table before
//! ever reaching this module.

use std::cmp::min;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;

use crate::error::{Error, Result};
use crate::store::{LockQuery, Store};
use crate::target::LockTarget;

/// An internal control-flow signal raised by a single attempt in the
/// acquire loop. It is consumed entirely inside the loop and never escapes
/// `acquire` as a public error.
enum Retry {
    /// Counts against `max_retries` (contention, or a lost expiry-reclaim
    /// race).
    Counted,
    /// Free: the loop observed a transient anomaly (`refcount < 1`) that the
    /// retry budget should not be charged for.
    Free,
}

/// Either "keep looping" or the terminal `LockTimeout` once the (possibly
/// refunded) retry budget is exhausted.
enum Outcome {
    Continue,
    TimedOut,
}

/// Applies one retry signal to the budget: an anomaly retry (`free`) is
/// refunded before the usual check, so it still backs off and still bounds
/// total wait, but never causes a timeout on its own.
fn charge_retry(signal: Retry, retries: &mut u32, max_retries: u32) -> Outcome {
    if matches!(signal, Retry::Free) {
        *retries = retries.saturating_sub(1);
    }
    if *retries + 1 >= max_retries {
        return Outcome::TimedOut;
    }
    *retries += 1;
    Outcome::Continue
}

/// Exponential backoff with a ceiling: doubles `interval`, never exceeding
/// `max`.
fn grow_interval(interval: std::time::Duration, max: std::time::Duration) -> std::time::Duration {
    min(max, interval * 2)
}

/// Drives the acquire state machine against `store` for an already-resolved
/// root target. Callers are expected to have already gone through the
/// re-entrancy fast path; this function always performs at least one store
/// round-trip. On any failure — timeout or unexpected store error alike —
/// the re-entrancy bump the caller performed before calling us is rolled
/// back here, so the calling thread's count is restored to its pre-acquire
/// value regardless of which branch failed.
pub async fn acquire(store: &dyn Store, root: &Arc<dyn LockTarget>) -> Result<()> {
    match acquire_loop(store, root).await {
        Ok(()) => Ok(()),
        Err(err) => {
            crate::reentrancy::drop_one(root.class_name(), &root.key());
            Err(err)
        }
    }
}

async fn acquire_loop(store: &dyn Store, root: &Arc<dyn LockTarget>) -> Result<()> {
    let scope = root.scope();
    let key = root.key();
    let tunables = root.tunables();

    let mut interval = tunables.first_retry_interval;
    let mut retries: u32 = 0;

    macro_rules! retry_or_fail {
        ($signal:expr) => {{
            match charge_retry($signal, &mut retries, tunables.max_retries) {
                Outcome::Continue => {
                    async_std::task::sleep(interval).await;
                    interval = grow_interval(interval, tunables.max_retry_interval);
                    continue;
                }
                Outcome::TimedOut => {
                    tracing::warn!(scope = %scope, key = %key, retries, "lock acquisition timed out");
                    return Err(Error::LockTimeout { scope, key, retries });
                }
            }
        }};
    }

    loop {
        let query = LockQuery::new(scope.clone(), key.clone());
        let doc = store
            .atomic_inc(&query, 1)
            .await
            .map_err(Error::LockFailure)?
            .ok_or_else(|| {
                Error::LockFailure(anyhow!(
                    "unconditional atomic_inc returned no document for {scope}/{key}"
                ))
            })?;
        let mut r = doc.refcount;

        if r < 1 {
            tracing::warn!(scope = %scope, key = %key, refcount = r, "anomalous refcount below 1, retrying");
            retry_or_fail!(Retry::Free);
        }

        if let Some(expire_at) = doc.expire_at {
            if expire_at <= Utc::now() {
                tracing::debug!(scope = %scope, key = %key, "lock expired, attempting reclamation");
                let reclaim_query = LockQuery::new(scope.clone(), key.clone()).refcount_gt(1);
                match store
                    .atomic_inc(&reclaim_query, -1)
                    .await
                    .map_err(Error::LockFailure)?
                {
                    None => {
                        tracing::debug!(scope = %scope, key = %key, "lost expiry reclamation race");
                        retry_or_fail!(Retry::Counted);
                    }
                    Some(reclaimed) => {
                        r = reclaimed.refcount;
                    }
                }
            }
        }

        if r > 1 {
            tracing::debug!(scope = %scope, key = %key, refcount = r, "contended, backing off");
            let compensate = LockQuery::new(scope.clone(), key.clone());
            store
                .atomic_inc(&compensate, -1)
                .await
                .map_err(Error::LockFailure)?;
            retry_or_fail!(Retry::Counted);
        }

        debug_assert_eq!(r, 1);
        let expiry = Utc::now()
            + chrono::Duration::from_std(tunables.max_lifetime)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));
        let expiry_query = LockQuery::new(scope.clone(), key.clone());
        store
            .atomic_set_expiry(&expiry_query, expiry)
            .await
            .map_err(Error::LockFailure)?;
        tracing::debug!(scope = %scope, key = %key, "acquired");
        return Ok(());
    }
}

/// Drives the release state machine against `store` for an already-resolved
/// root target.
/// Callers have already decremented the re-entrancy table and found it at
/// zero; this function always performs at least one store round-trip.
pub async fn release(store: &dyn Store, root: &Arc<dyn LockTarget>) -> Result<()> {
    let scope = root.scope();
    let key = root.key();

    let query = LockQuery::new(scope.clone(), key.clone());
    let doc = store
        .atomic_inc(&query, -1)
        .await
        .map_err(Error::LockFailure)?
        .ok_or_else(|| {
            Error::LockFailure(anyhow!(
                "unconditional atomic_inc returned no document for {scope}/{key}"
            ))
        })?;

    if doc.refcount == 0 {
        let gc_query = LockQuery::new(scope.clone(), key.clone()).refcount_eq(0);
        match store.atomic_delete(&gc_query).await {
            Ok(_) => {}
            Err(err) => {
                // A genuine store failure, not the expected lost-race (that
                // comes back as `Ok(None)` and is already absorbed above).
                tracing::error!(scope = %scope, key = %key, error = %err, "release GC delete failed");
                return Err(Error::LockFailure(err));
            }
        }
    }
    tracing::debug!(scope = %scope, key = %key, "released");
    Ok(())
}
