//! Delayed actions that cancel when superseded.
//!
//! Resize and drag streams request a relayout on every step; only the last
//! request within `delay` should reach the engine. `trigger` schedules the
//! action after `delay` on the tokio timer and aborts whatever was still
//! pending, so at most one action is outstanding per `Debouncer`.

use crate::DEBOUNCE_SUPERSEDED;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Debug)]
pub struct Debouncer {
    label: &'static str,
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(label: &'static str, delay: Duration) -> Self {
        Self {
            label,
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `action` after the delay unless another trigger arrives first.
    /// Requires a running tokio runtime.
    pub fn trigger<F>(&self, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });
        if let Some(prev) = self.slot().replace(handle) {
            if !prev.is_finished() {
                DEBOUNCE_SUPERSEDED.fetch_add(1, Ordering::Relaxed);
                trace!(target: "events.debounce", debouncer = self.label, "superseded");
            }
            prev.abort();
        }
    }

    /// Abort the pending action, if any. Returns whether one was still waiting.
    pub fn cancel(&self) -> bool {
        match self.slot().take() {
            Some(handle) => {
                let waiting = !handle.is_finished();
                handle.abort();
                waiting
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot().as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(handle) = self.slot().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_last_action() {
        let d = Debouncer::new("relayout", Duration::from_millis(100));
        let fired = Arc::new(AtomicU32::new(0));
        let last = Arc::new(AtomicU32::new(0));
        for step in 1..=5u32 {
            let fired = Arc::clone(&fired);
            let last = Arc::clone(&last);
            d.trigger(async move {
                fired.fetch_add(1, Ordering::SeqCst);
                last.store(step, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 5);
        assert!(!d.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_action() {
        let d = Debouncer::new("relayout", Duration::from_millis(50));
        let fired = Arc::new(AtomicU32::new(0));
        let f = Arc::clone(&fired);
        d.trigger(async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(d.is_pending());
        assert!(d.cancel());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!d.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_triggers_each_fire() {
        let d = Debouncer::new("resize", Duration::from_millis(20));
        let fired = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let f = Arc::clone(&fired);
            d.trigger(async move {
                f.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }
}
