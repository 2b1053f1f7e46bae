//! Cancellation scopes.
//!
//! Scopes form a tree: cancelling a scope cancels every descendant, while a
//! child can be cancelled without touching its parent. The first cause to
//! fire wins and a fired scope never resets.

use crate::errors::{Cause, PipeError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

struct ScopeInner {
    id: u64,
    /// Whether the scope has fired.
    cancelled: AtomicBool,
    /// The cause of firing (first one wins).
    cause: RwLock<Option<Cause>>,
    /// Effective deadline: the earliest of this scope's and its ancestors'.
    deadline: Option<Instant>,
    notify: Notify,
    children: Mutex<HashMap<u64, Weak<ScopeInner>>>,
    parent: Option<Weak<ScopeInner>>,
}

impl ScopeInner {
    fn fire(&self, cause: Cause) -> bool {
        {
            let mut slot = self.cause.write();
            if slot.is_some() {
                return false;
            }
            *slot = Some(cause);
        }
        // Flag flips under the children lock so a concurrent `child()` either
        // registers before we drain or sees the flag and inherits the cause.
        let children: Vec<Weak<ScopeInner>> = {
            let mut children = self.children.lock();
            self.cancelled.store(true, Ordering::SeqCst);
            children.drain().map(|(_, child)| child).collect()
        };
        self.notify.notify_waiters();

        for child in children {
            if let Some(child) = child.upgrade() {
                child.fire(cause);
            }
        }
        true
    }

    fn cause(&self) -> Option<Cause> {
        if self.cancelled.load(Ordering::SeqCst) {
            *self.cause.read()
        } else {
            None
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            parent.children.lock().remove(&self.id);
        }
    }
}

/// A cancellation scope: a one-shot signal plus the recorded cause.
///
/// Cloning a `Scope` yields another handle to the same scope. Use
/// [`Scope::child`] to derive an independently cancellable scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Creates a new root scope that has not fired.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None, None)
    }

    fn build(parent: Option<&Arc<ScopeInner>>, deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
                cancelled: AtomicBool::new(false),
                cause: RwLock::new(None),
                deadline,
                notify: Notify::new(),
                children: Mutex::new(HashMap::new()),
                parent: parent.map(Arc::downgrade),
            }),
        }
    }

    /// Derives a child scope.
    ///
    /// The child fires when it is cancelled itself, when `deadline` passes,
    /// or when this scope fires, whichever happens first. A child derived
    /// from an already fired scope starts out fired with the same cause.
    #[must_use]
    pub fn child(&self, deadline: Option<Instant>) -> Self {
        let deadline = match (self.inner.deadline, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let child = Self::build(Some(&self.inner), deadline);

        let mut children = self.inner.children.lock();
        if self.inner.cancelled.load(Ordering::SeqCst) {
            drop(children);
            if let Some(cause) = self.inner.cause() {
                child.inner.fire(cause);
            }
        } else {
            children.insert(child.inner.id, Arc::downgrade(&child.inner));
        }
        child
    }

    /// Cancels the scope and all of its descendants.
    pub fn cancel(&self) {
        self.cancel_with(Cause::Canceled);
    }

    /// Fires the scope with the given cause. Only the first cause is kept.
    pub fn cancel_with(&self, cause: Cause) {
        if self.inner.fire(cause) {
            debug!(scope = self.inner.id, %cause, "scope fired");
        }
    }

    /// Returns the effective deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns the cause if the scope has fired.
    ///
    /// An elapsed deadline is observed here, so polling `check` between steps
    /// is enough to notice a timeout.
    #[must_use]
    pub fn check(&self) -> Option<Cause> {
        if let Some(cause) = self.inner.cause() {
            return Some(cause);
        }
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                self.cancel_with(Cause::DeadlineExceeded);
                return self.inner.cause();
            }
        }
        None
    }

    /// Returns whether the scope has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.check().is_some()
    }

    /// Returns the cancellation error if the scope has fired.
    #[must_use]
    pub fn err(&self) -> Option<PipeError> {
        self.check().map(PipeError::Cancelled)
    }

    /// Waits until the scope fires and returns the cause.
    pub async fn done(&self) -> Cause {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(cause) = self.check() {
                return cause;
            }

            match self.inner.deadline {
                Some(deadline) => {
                    tokio::select! {
                        () = &mut notified => {}
                        () = tokio::time::sleep_until(deadline) => {
                            self.cancel_with(Cause::DeadlineExceeded);
                        }
                    }
                }
                None => notified.await,
            }
        }
    }

    #[cfg(test)]
    fn child_count(&self) -> usize {
        self.inner.children.lock().len()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("cause", &self.inner.cause())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_scope_default_not_cancelled() {
        let scope = Scope::new();
        assert!(!scope.is_cancelled());
        assert!(scope.check().is_none());
        assert!(scope.err().is_none());
    }

    #[test]
    fn test_scope_cancel() {
        let scope = Scope::new();
        scope.cancel();

        assert!(scope.is_cancelled());
        assert_eq!(scope.check(), Some(Cause::Canceled));
    }

    #[test]
    fn test_first_cause_wins() {
        let scope = Scope::new();
        scope.cancel_with(Cause::DeadlineExceeded);
        scope.cancel();

        assert_eq!(scope.check(), Some(Cause::DeadlineExceeded));
    }

    #[test]
    fn test_parent_cancel_propagates() {
        let parent = Scope::new();
        let child = parent.child(None);
        let grandchild = child.child(None);

        parent.cancel();

        assert_eq!(child.check(), Some(Cause::Canceled));
        assert_eq!(grandchild.check(), Some(Cause::Canceled));
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = Scope::new();
        let child = parent.child(None);
        let sibling = parent.child(None);

        child.cancel();

        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!sibling.is_cancelled());
    }

    #[test]
    fn test_child_of_fired_scope_starts_fired() {
        let parent = Scope::new();
        parent.cancel_with(Cause::DeadlineExceeded);

        let child = parent.child(None);
        assert_eq!(child.check(), Some(Cause::DeadlineExceeded));
    }

    #[test]
    fn test_dropped_child_unregisters() {
        let parent = Scope::new();
        let child = parent.child(None);
        assert_eq!(parent.child_count(), 1);

        drop(child);
        assert_eq!(parent.child_count(), 0);
    }

    #[test]
    fn test_child_inherits_earlier_deadline() {
        let now = Instant::now();
        let parent = Scope::new().child(Some(now + Duration::from_secs(5)));
        let child = parent.child(Some(now + Duration::from_secs(60)));
        assert_eq!(child.deadline(), Some(now + Duration::from_secs(5)));

        let tighter = parent.child(Some(now + Duration::from_secs(1)));
        assert_eq!(tighter.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires() {
        let scope = Scope::new().child(Some(Instant::now() + Duration::from_millis(50)));
        assert!(!scope.is_cancelled());

        let cause = scope.done().await;
        assert_eq!(cause, Cause::DeadlineExceeded);
        assert!(scope.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_deadline_reaches_child_waiter() {
        let parent = Scope::new().child(Some(Instant::now() + Duration::from_millis(20)));
        let child = parent.child(None);

        assert_eq!(child.done().await, Cause::DeadlineExceeded);
        assert_eq!(parent.check(), Some(Cause::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_done_wakes_on_cancel() {
        let scope = Scope::new();
        let waiter = {
            let scope = scope.clone();
            tokio::spawn(async move { scope.done().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        scope.cancel();

        let cause = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter hung")
            .unwrap();
        assert_eq!(cause, Cause::Canceled);
    }

    #[tokio::test]
    async fn test_explicit_cancel_beats_deadline() {
        let scope = Scope::new().child(Some(Instant::now() + Duration::from_secs(60)));
        scope.cancel();
        assert_eq!(scope.done().await, Cause::Canceled);
    }
}
