//! Lockable descriptors.
//!
//! The original object-model source lets arbitrary host classes become
//! lockable by mixing in a module and declaring a `scope`/`key`/`parent`
//! "source" as a literal, a named accessor, or a callable, evaluated
//! reflectively on whatever instance was passed in. There is no equivalent
//! reflection in Rust, so this is rewritten as an explicit capability set:
//! [`LockTarget`] *is* the descriptor, and its methods are what the source
//! variants would have evaluated to. Instances never get introspected by
//! name — they are opaque handles the engine only ever touches through
//! this trait.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// Per-class tunables controlling retry and expiry behavior.
#[derive(Clone, Debug)]
pub struct Tunables {
    /// Maximum number of budget-counted retries before `LockTimeout`.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub first_retry_interval: Duration,
    /// Ceiling the exponential backoff never exceeds.
    pub max_retry_interval: Duration,
    /// How long a freshly-acquired lock is valid before it becomes
    /// reclaimable by another acquirer.
    pub max_lifetime: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            max_retries: 10,
            first_retry_interval: Duration::from_millis(200),
            max_retry_interval: Duration::from_secs(2),
            max_lifetime: Duration::from_secs(60),
        }
    }
}

/// The capability set a lockable instance exposes to the engine: a stable
/// class identity, a derived `(scope, key)`, an optional parent to resolve
/// the root through, and the tunables governing acquisition of the root.
///
/// A `LockTarget` whose `parent()` is `None` is a root; the entire object
/// subtree under a root shares the root's `(scope, key)` lock.
pub trait LockTarget: Send + Sync {
    /// Stable class identity, used to namespace the re-entrancy table and
    /// to detect cycles while resolving to a root.
    fn class_name(&self) -> &'static str;
    /// Namespace the key lives in.
    fn scope(&self) -> String;
    /// Compound identity within `scope`.
    fn key(&self) -> String;
    /// The next lockable up the dependency graph, or `None` if this is a
    /// root.
    fn parent(&self) -> Option<Arc<dyn LockTarget>>;
    /// Tunables to use if this target turns out to be (or resolves to) the
    /// root that is actually locked.
    fn tunables(&self) -> &Tunables;
}

/// How a descriptor derives `scope` for an instance of `T`.
pub enum ScopeSource<T> {
    /// A fixed string, independent of the instance.
    Literal(Cow<'static, str>),
    /// Computed from the instance.
    Derive(Arc<dyn Fn(&T) -> String + Send + Sync>),
}

/// How a descriptor derives `key` for an instance of `T`. Unlike scope,
/// key has no literal variant: a lock keyed by a constant would collapse
/// every instance of `T` onto one lock, which is never what's wanted.
pub enum KeySource<T> {
    /// Computed from the instance.
    Derive(Arc<dyn Fn(&T) -> String + Send + Sync>),
}

type ParentSource<T> = Arc<dyn Fn(&T) -> Arc<dyn LockTarget> + Send + Sync>;

/// A process-lifetime, per-class configuration: how to derive `scope` and
/// `key`, and — for non-root classes — how to derive the parent lockable.
/// Register one per class (typically behind a `static` via
/// [`crate::impl_lock_root!`]/[`crate::impl_lock_child!`]) and [`Descriptor::bind`]
/// it to each instance as needed.
pub struct Descriptor<T> {
    class_name: &'static str,
    scope: ScopeSource<T>,
    key: KeySource<T>,
    parent: Option<ParentSource<T>>,
    tunables: Tunables,
}

impl<T> Descriptor<T> {
    /// Builds a root descriptor (no parent source).
    pub fn root(class_name: &'static str, scope: ScopeSource<T>, key: KeySource<T>) -> Result<Self> {
        if class_name.is_empty() {
            return Err(Error::ArgumentError("class_name must not be empty".into()));
        }
        Ok(Self {
            class_name,
            scope,
            key,
            parent: None,
            tunables: Tunables::default(),
        })
    }

    /// Builds a non-root descriptor. Its `scope` is always its own class
    /// name — scope only matters at the root, since locking always operates
    /// on the resolved root's `(scope, key)`.
    pub fn child(
        class_name: &'static str,
        key: KeySource<T>,
        parent: impl Fn(&T) -> Arc<dyn LockTarget> + Send + Sync + 'static,
    ) -> Result<Self> {
        if class_name.is_empty() {
            return Err(Error::ArgumentError("class_name must not be empty".into()));
        }
        Ok(Self {
            class_name,
            scope: ScopeSource::Literal(Cow::Borrowed(class_name)),
            key,
            parent: Some(Arc::new(parent)),
            tunables: Tunables::default(),
        })
    }

    /// Overrides the default tunables.
    pub fn with_tunables(mut self, tunables: Tunables) -> Self {
        self.tunables = tunables;
        self
    }

    /// Whether this descriptor is configured as a root (no parent source).
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Binds this descriptor to a concrete instance, producing a
    /// [`LockTarget`] the engine can resolve and lock.
    pub fn bind(self: &Arc<Self>, instance: Arc<T>) -> Arc<dyn LockTarget>
    where
        T: Send + Sync + 'static,
    {
        Arc::new(BoundTarget {
            descriptor: self.clone(),
            instance,
        })
    }
}

struct BoundTarget<T> {
    descriptor: Arc<Descriptor<T>>,
    instance: Arc<T>,
}

impl<T: Send + Sync + 'static> LockTarget for BoundTarget<T> {
    fn class_name(&self) -> &'static str {
        self.descriptor.class_name
    }

    fn scope(&self) -> String {
        match &self.descriptor.scope {
            ScopeSource::Literal(s) => s.clone().into_owned(),
            ScopeSource::Derive(f) => f(&self.instance),
        }
    }

    fn key(&self) -> String {
        match &self.descriptor.key {
            KeySource::Derive(f) => f(&self.instance),
        }
    }

    fn parent(&self) -> Option<Arc<dyn LockTarget>> {
        self.descriptor
            .parent
            .as_ref()
            .map(|derive| derive(&self.instance))
    }

    fn tunables(&self) -> &Tunables {
        &self.descriptor.tunables
    }
}

/// Declares a type as a lock root: `class_name`, `scope`, `key` configure
/// the process-lifetime descriptor. Generates `$ty::try_lock_descriptor()`
/// and `$ty::lock_target(self: &Arc<Self>)`.
#[macro_export]
macro_rules! impl_lock_root {
    ($ty:ty, class = $class:expr, scope = $scope:expr, key = $key:expr $(, tunables = $tunables:expr)?) => {
        impl $ty {
            /// Process-lifetime descriptor for this type, built and
            /// validated once. Surfaces a registration-time `ArgumentError`
            /// (e.g. an empty class name) to the caller instead of
            /// panicking — call this explicitly where a misconfiguration
            /// should fail gracefully rather than abort the process.
            pub fn try_lock_descriptor() -> $crate::Result<&'static ::std::sync::Arc<$crate::Descriptor<$ty>>> {
                static DESCRIPTOR: ::std::sync::OnceLock<
                    ::std::result::Result<::std::sync::Arc<$crate::Descriptor<$ty>>, $crate::Error>,
                > = ::std::sync::OnceLock::new();
                DESCRIPTOR
                    .get_or_init(|| {
                        let descriptor = $crate::Descriptor::root($class, $scope, $key)?;
                        $( let descriptor = descriptor.with_tunables($tunables); )?
                        Ok(::std::sync::Arc::new(descriptor))
                    })
                    .as_ref()
                    // `Error` isn't `Clone` (it wraps `anyhow::Error` for
                    // `LockFailure`), so the cached error is re-described
                    // rather than cloned; `Descriptor::root`/`child` only
                    // ever produce `ArgumentError` here.
                    .map_err(|err| $crate::Error::ArgumentError(err.to_string()))
            }

            /// Binds this instance to its descriptor, producing a
            /// [`LockTarget`](crate::LockTarget) the engine can acquire.
            ///
            /// Panics if the descriptor failed to build (a registration-time
            /// misconfiguration such as an empty class name). Call
            /// [`Self::try_lock_descriptor`] explicitly at startup to
            /// validate registration without risking that panic later.
            pub fn lock_target(self: &::std::sync::Arc<Self>) -> ::std::sync::Arc<dyn $crate::LockTarget> {
                Self::try_lock_descriptor()
                    .expect("valid lock descriptor")
                    .bind(self.clone())
            }
        }
    };
}

/// Declares a type as locked through a parent rather than being a root
/// itself. `$parent` is a closure mapping `&$ty` to the parent's
/// `LockTarget`.
#[macro_export]
macro_rules! impl_lock_child {
    ($ty:ty, class = $class:expr, key = $key:expr, parent = $parent:expr $(, tunables = $tunables:expr)?) => {
        impl $ty {
            /// Process-lifetime descriptor for this type, built and
            /// validated once. Surfaces a registration-time `ArgumentError`
            /// (e.g. an empty class name) to the caller instead of
            /// panicking — call this explicitly where a misconfiguration
            /// should fail gracefully rather than abort the process.
            pub fn try_lock_descriptor() -> $crate::Result<&'static ::std::sync::Arc<$crate::Descriptor<$ty>>> {
                static DESCRIPTOR: ::std::sync::OnceLock<
                    ::std::result::Result<::std::sync::Arc<$crate::Descriptor<$ty>>, $crate::Error>,
                > = ::std::sync::OnceLock::new();
                DESCRIPTOR
                    .get_or_init(|| {
                        let descriptor = $crate::Descriptor::child($class, $key, $parent)?;
                        $( let descriptor = descriptor.with_tunables($tunables); )?
                        Ok(::std::sync::Arc::new(descriptor))
                    })
                    .as_ref()
                    // `Error` isn't `Clone` (it wraps `anyhow::Error` for
                    // `LockFailure`), so the cached error is re-described
                    // rather than cloned; `Descriptor::root`/`child` only
                    // ever produce `ArgumentError` here.
                    .map_err(|err| $crate::Error::ArgumentError(err.to_string()))
            }

            /// Binds this instance to its descriptor, producing a
            /// [`LockTarget`](crate::LockTarget) the engine can resolve to
            /// its root and acquire.
            ///
            /// Panics if the descriptor failed to build (a registration-time
            /// misconfiguration such as an empty class name). Call
            /// [`Self::try_lock_descriptor`] explicitly at startup to
            /// validate registration without risking that panic later.
            pub fn lock_target(self: &::std::sync::Arc<Self>) -> ::std::sync::Arc<dyn $crate::LockTarget> {
                Self::try_lock_descriptor()
                    .expect("valid lock descriptor")
                    .bind(self.clone())
            }
        }
    };
}
