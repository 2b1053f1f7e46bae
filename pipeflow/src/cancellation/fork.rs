//! Scope transforms applied when a session is forked.

use super::Scope;
use crate::errors::Cause;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

type ForkFn = dyn Fn(&Scope) -> (Scope, Release) + Send + Sync;

/// Derives a new cancellation scope from an existing one.
///
/// A `ScopeFork` is reusable: every application derives a fresh scope, so a
/// timeout is measured from the moment it is applied.
#[derive(Clone)]
pub struct ScopeFork {
    func: Arc<ForkFn>,
}

impl ScopeFork {
    /// Creates a transform from an arbitrary function.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Scope) -> (Scope, Release) + Send + Sync + 'static,
    {
        Self { func: Arc::new(func) }
    }

    /// A child scope with no deadline, cancelled when released.
    #[must_use]
    pub fn cancelable() -> Self {
        Self::new(|scope| {
            let child = scope.child(None);
            let release = Release::new(child.clone());
            (child, release)
        })
    }

    /// A child scope that fires `timeout` after the transform is applied.
    #[must_use]
    pub fn timeout(timeout: Duration) -> Self {
        Self::new(move |scope| {
            let child = scope.child(Some(Instant::now() + timeout));
            let release = Release::new(child.clone());
            (child, release)
        })
    }

    /// A child scope that fires at `deadline`.
    #[must_use]
    pub fn deadline(deadline: Instant) -> Self {
        Self::new(move |scope| {
            let child = scope.child(Some(deadline));
            let release = Release::new(child.clone());
            (child, release)
        })
    }

    /// Applies the transform to `scope`.
    #[must_use]
    pub fn apply(&self, scope: &Scope) -> (Scope, Release) {
        (self.func)(scope)
    }
}

impl std::fmt::Debug for ScopeFork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeFork").finish_non_exhaustive()
    }
}

/// Handle that cancels a forked scope once its owner is done with it.
///
/// Releasing happens on [`Release::release`] or on drop. A no-op handle is
/// produced when a fork shares its parent's scope.
#[must_use = "dropping a Release cancels the forked scope"]
#[derive(Debug, Default)]
pub struct Release {
    scope: Option<Scope>,
}

impl Release {
    /// Creates a handle that cancels `scope` when released.
    pub fn new(scope: Scope) -> Self {
        Self { scope: Some(scope) }
    }

    /// A handle that does nothing.
    pub fn noop() -> Self {
        Self { scope: None }
    }

    /// Returns true if releasing has no effect.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.scope.is_none()
    }

    /// Cancels the forked scope now.
    pub fn release(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(scope) = self.scope.take() {
            scope.cancel_with(Cause::Canceled);
        }
    }
}

impl Drop for Release {
    fn drop(&mut self) {
        self.cancel();
    }
}
