//! Thread-local re-entrancy table.
//!
//! Nesting is a same-thread property: if a thread already holds a lock and
//! asks to acquire it again (directly, or indirectly through some deeper
//! call frame), that second acquisition must be non-blocking and must never
//! touch the store. Two different threads wanting the same key still have
//! to contend cross-process, so this table lives behind `thread_local!`, one
//! instance per thread, never shared.
//!
//! Counts are namespaced per class name so that two unrelated root classes
//! that happen to derive the same string key don't collide.

use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    static COUNTS: RefCell<HashMap<&'static str, HashMap<String, u32>>> =
        RefCell::new(HashMap::new());
}

/// Increments the nesting count for `(class, key)` on the calling thread and
/// returns the new count. A returned value greater than 1 means this
/// acquisition is a re-entrant no-op as far as the store is concerned.
pub fn bump(class: &'static str, key: &str) -> u32 {
    COUNTS.with(|counts| {
        let mut counts = counts.borrow_mut();
        let entry = counts.entry(class).or_default().entry(key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    })
}

/// Decrements the nesting count for `(class, key)` on the calling thread and
/// returns the new count, removing the entry entirely once it reaches zero
/// so long-lived threads don't accumulate stale keys.
pub fn drop_one(class: &'static str, key: &str) -> u32 {
    COUNTS.with(|counts| {
        let mut counts = counts.borrow_mut();
        let Some(by_key) = counts.get_mut(class) else {
            return 0;
        };
        let Some(count) = by_key.get_mut(key) else {
            return 0;
        };
        *count = count.saturating_sub(1);
        let remaining = *count;
        if remaining == 0 {
            by_key.remove(key);
            if by_key.is_empty() {
                counts.remove(class);
            }
        }
        remaining
    })
}

/// The calling thread's current nesting count for `(class, key)`, 0 if none.
pub fn count(class: &'static str, key: &str) -> u32 {
    COUNTS.with(|counts| {
        counts
            .borrow()
            .get(class)
            .and_then(|by_key| by_key.get(key))
            .copied()
            .unwrap_or(0)
    })
}
