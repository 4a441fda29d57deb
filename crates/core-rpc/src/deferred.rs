//! Single-resolution placeholder value.
//!
//! A `Deferred` starts pending and is resolved exactly once by any holder of a
//! clone. Every awaiter, whether it started waiting before or after the
//! resolution, observes the same value. A second `resolve` is a no-op that
//! returns `false` (logged at debug) rather than a panic, so racing settlers
//! never take the process down.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("resolved", &self.lock().is_some())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deferred<T> {
    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// True once `resolve` has succeeded.
    pub fn is_resolved(&self) -> bool {
        self.lock().is_some()
    }

    /// Two handles are the same placeholder when they share the slot.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + Send + 'static> Deferred<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Already-settled placeholder (handy for short-circuit paths and tests).
    pub fn resolved(value: T) -> Self {
        let d = Self::new();
        d.resolve(value);
        d
    }

    /// Settle the placeholder. Returns `false` and leaves the stored value
    /// untouched when it was already resolved.
    pub fn resolve(&self, value: T) -> bool {
        {
            let mut slot = self.lock();
            if slot.is_some() {
                debug!(target: "rpc.deferred", "resolve_ignored_already_settled");
                return false;
            }
            *slot = Some(value);
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// Current value without waiting.
    pub fn peek(&self) -> Option<T> {
        self.lock().clone()
    }

    /// Suspend until resolved and return a copy of the value.
    pub async fn wait(&self) -> T {
        loop {
            // Register interest before inspecting the slot so a resolve that
            // lands in between still wakes this waiter.
            let notified = self.inner.notify.notified();
            if let Some(value) = self.peek() {
                return value;
            }
            notified.await;
        }
    }
}

impl<T: Clone + Send + 'static> IntoFuture for Deferred<T> {
    type Output = T;
    type IntoFuture = Pin<Box<dyn Future<Output = T> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn awaiters_before_and_after_resolution_see_value() {
        let d = Deferred::<u32>::new();
        let early = {
            let d = d.clone();
            tokio::spawn(async move { d.wait().await })
        };
        tokio::task::yield_now().await;
        assert!(d.resolve(7));
        let late = d.clone().await;
        assert_eq!(early.await.unwrap(), 7);
        assert_eq!(late, 7);
    }

    #[tokio::test]
    async fn second_resolve_is_ignored() {
        let d = Deferred::resolved("first".to_string());
        assert!(!d.resolve("second".to_string()));
        assert_eq!(d.wait().await, "first");
    }

    #[tokio::test]
    async fn pending_deferred_does_not_settle() {
        let d = Deferred::<()>::new();
        let res = tokio::time::timeout(Duration::from_millis(20), d.wait()).await;
        assert!(res.is_err(), "unresolved deferred must stay pending");
        assert!(!d.is_resolved());
    }

    #[test]
    fn clones_share_identity() {
        let a = Deferred::<u8>::new();
        let b = a.clone();
        assert!(a.same_as(&b));
        assert!(!a.same_as(&Deferred::new()));
    }
}
