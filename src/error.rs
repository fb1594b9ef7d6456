use thiserror::Error;

/// Result type returned by every public operation in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong acquiring, resolving, or releasing a lock.
///
/// Registration-time failures (`ArgumentError`, `InvalidConfig`) are raised
/// synchronously to the caller that misconfigured a descriptor. The rest
/// surface only from `acquire`/`release`/`lock`, and only after the calling
/// thread's re-entrancy count has already been rolled back.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A [`crate::target::Descriptor`] was built with an unsupported or
    /// malformed parameter (e.g. an empty class name).
    #[error("invalid lock configuration: {0}")]
    ArgumentError(String),

    /// The resolver hit a descriptor that could not be evaluated at resolve
    /// time.
    #[error("invalid lock configuration encountered while resolving a lock target: {0}")]
    InvalidConfig(String),

    /// Walking parent references revisited a class already on the path from
    /// the originally-locked instance.
    #[error("circular lock dependency through classes {classes:?}")]
    CircularLock {
        /// The full set of class names seen on the cyclic path.
        classes: Vec<&'static str>,
    },

    /// `max_retries` was exhausted without acquiring the lock. The calling
    /// thread's re-entrancy count for `key` has already been reverted.
    #[error("timed out acquiring lock {scope}/{key} after {retries} retries")]
    LockTimeout {
        /// Scope of the lock that timed out.
        scope: String,
        /// Key of the lock that timed out.
        key: String,
        /// Number of retries attempted before giving up.
        retries: u32,
    },

    /// The store returned something the protocol does not know how to
    /// interpret, or a genuine transport/backend failure occurred.
    #[error("lock store operation failed")]
    LockFailure(#[from] anyhow::Error),
}
