//! Walks a [`LockTarget`]'s parent chain up to its root.
//!
//! Locking never operates on the instance originally passed in — it operates
//! on the root of whatever object subtree that instance belongs to, so that
//! the whole subtree contends on one `(scope, key)`. This module is the
//! traversal that finds that root, and the cycle detector that protects it.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::target::LockTarget;

/// Follows `target.parent()` until it returns `None`, returning that final,
/// root target.
///
/// A class name revisited during the walk means the parent graph cycles
/// back on itself; this is reported as [`Error::CircularLock`] citing every
/// class name seen on the path, raised before any store interaction (the
/// resolver never touches the store).
pub fn root_for(target: &Arc<dyn LockTarget>) -> Result<Arc<dyn LockTarget>> {
    let mut current = target.clone();
    let mut visited: HashSet<&'static str> = HashSet::new();
    visited.insert(current.class_name());

    loop {
        match current.parent() {
            None => return Ok(current),
            Some(parent) => {
                let class = parent.class_name();
                if !visited.insert(class) {
                    let mut classes: Vec<&'static str> = visited.into_iter().collect();
                    classes.sort_unstable();
                    return Err(Error::CircularLock { classes });
                }
                current = parent;
            }
        }
    }
}
