//! The atomic primitives the acquire/release engine drives.
//!
//! `Store` is deliberately narrow: three find-and-modify operations against a
//! single document identified by `(scope, key)`. A real backing store (a
//! document database reached over the network, say) implements it against
//! whatever native find-and-modify/compare-and-set facility it has. The
//! contract each method must uphold is that one call is a single serialized
//! step with respect to any other writer of the same document — callers
//! never see a torn read/increment/write.
//!
//! A predicate match failure that a plain upsert cannot resolve is reported
//! as `Ok(None)`, not an error: this is the store telling the engine "no
//! document satisfies your predicate and I can't fabricate one that would",
//! which the engine's retry loop treats as expected contention. `Err` is
//! reserved for failures the protocol has no opinion about — a dropped
//! connection, a serialization error, and so on.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// One lock document as it exists in the store.
#[derive(Clone, Debug, PartialEq)]
pub struct LockDocument {
    /// Namespace the key lives in.
    pub scope: String,
    /// Compound identity, unique together with `scope`.
    pub key: String,
    /// `1` = held, `0` = garbage-collectable, `>1` = racing acquirers.
    pub refcount: i64,
    /// The moment past which other acquirers may reclaim this lock.
    pub expire_at: Option<DateTime<Utc>>,
}

/// An optional condition the target document's `refcount` must satisfy for
/// a query to match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefcountPredicate {
    greater_than: Option<i64>,
    equals: Option<i64>,
}

impl RefcountPredicate {
    fn is_empty(&self) -> bool {
        self.greater_than.is_none() && self.equals.is_none()
    }

    fn matches(&self, refcount: i64) -> bool {
        self.greater_than.map_or(true, |n| refcount > n) && self.equals.map_or(true, |n| refcount == n)
    }
}

/// A query against exactly one lock document, with an optional refcount
/// condition.
#[derive(Clone, Debug)]
pub struct LockQuery {
    pub(crate) scope: String,
    pub(crate) key: String,
    refcount: RefcountPredicate,
}

impl LockQuery {
    /// A query for `(scope, key)` with no additional condition.
    pub fn new(scope: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            key: key.into(),
            refcount: RefcountPredicate::default(),
        }
    }

    /// Require `refcount > n` for the query to match an existing document.
    pub fn refcount_gt(mut self, n: i64) -> Self {
        self.refcount.greater_than = Some(n);
        self
    }

    /// Require `refcount == n` for the query to match an existing document.
    pub fn refcount_eq(mut self, n: i64) -> Self {
        self.refcount.equals = Some(n);
        self
    }
}

/// The three atomic operations the acquire/release engine is built on.
///
/// All three are keyed by `(scope, key)`. `atomic_inc` and `atomic_set` are
/// upsert-or-update; `atomic_delete` never creates. Implementations must
/// make each call behave as one serialized step against any other writer of
/// the same document — over a store without native find-and-modify, that
/// means a compare-and-set loop over a version field.
#[async_trait]
pub trait Store: Send + Sync {
    /// Atomically increments `refcount` by `delta`, creating the document
    /// with `refcount = delta` if it doesn't exist and `query`'s predicate
    /// (if any) is empty. Returns the post-update document, or `None` if the
    /// predicate excluded every candidate and no upsert could proceed.
    async fn atomic_inc(&self, query: &LockQuery, delta: i64) -> Result<Option<LockDocument>>;

    /// Atomically stamps `expire_at` on the document, creating it with
    /// `refcount = 1` if it doesn't exist. Returns the post-update document.
    async fn atomic_set_expiry(
        &self,
        query: &LockQuery,
        expire_at: DateTime<Utc>,
    ) -> Result<Option<LockDocument>>;

    /// Removes the document matching `query`, returning it, or `None` if
    /// nothing matched. Never creates.
    async fn atomic_delete(&self, query: &LockQuery) -> Result<Option<LockDocument>>;
}

/// An in-process reference `Store`, good enough to drive every scenario in
/// this crate's test suite without a live database. A single mutex over the
/// whole table makes the "one find-and-modify is one serialized step"
/// contract trivially true rather than simulated with a compare-and-set
/// loop — real backends will need the loop; this one doesn't.
#[derive(Clone, Default)]
pub struct MemoryStore {
    docs: Arc<Mutex<HashMap<(String, String), LockDocument>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current document for `(scope, key)`, if any. Test-only
    /// introspection; not part of the `Store` contract.
    pub fn peek(&self, scope: &str, key: &str) -> Option<LockDocument> {
        self.docs
            .lock()
            .get(&(scope.to_string(), key.to_string()))
            .cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn atomic_inc(&self, query: &LockQuery, delta: i64) -> Result<Option<LockDocument>> {
        let mut docs = self.docs.lock();
        let id = (query.scope.clone(), query.key.clone());
        if let Some(doc) = docs.get(&id) {
            if !query.refcount.matches(doc.refcount) {
                return Ok(None);
            }
            let mut updated = doc.clone();
            updated.refcount += delta;
            docs.insert(id, updated.clone());
            return Ok(Some(updated));
        }
        if !query.refcount.is_empty() {
            return Ok(None);
        }
        let doc = LockDocument {
            scope: query.scope.clone(),
            key: query.key.clone(),
            refcount: delta,
            expire_at: None,
        };
        docs.insert(id, doc.clone());
        Ok(Some(doc))
    }

    async fn atomic_set_expiry(
        &self,
        query: &LockQuery,
        expire_at: DateTime<Utc>,
    ) -> Result<Option<LockDocument>> {
        let mut docs = self.docs.lock();
        let id = (query.scope.clone(), query.key.clone());
        if let Some(doc) = docs.get(&id) {
            if !query.refcount.matches(doc.refcount) {
                return Ok(None);
            }
            let mut updated = doc.clone();
            updated.expire_at = Some(expire_at);
            docs.insert(id, updated.clone());
            return Ok(Some(updated));
        }
        if !query.refcount.is_empty() {
            return Ok(None);
        }
        let doc = LockDocument {
            scope: query.scope.clone(),
            key: query.key.clone(),
            refcount: 1,
            expire_at: Some(expire_at),
        };
        docs.insert(id, doc.clone());
        Ok(Some(doc))
    }

    async fn atomic_delete(&self, query: &LockQuery) -> Result<Option<LockDocument>> {
        let mut docs = self.docs.lock();
        let id = (query.scope.clone(), query.key.clone());
        match docs.get(&id) {
            Some(doc) if query.refcount.matches(doc.refcount) => Ok(docs.remove(&id)),
            _ => Ok(None),
        }
    }
}
