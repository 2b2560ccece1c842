//! One-shot and periodic timers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tracing::debug;

use crate::streams::SharedHandler;

struct TimerInner {
    // Cancellation flags, registered before the task is spawned so a
    // zero-delay timer cannot observe a missing entry.
    active: DashMap<u64, Arc<AtomicBool>>,
    next_id: AtomicU64,
    handle: Handle,
}

/// Timer service backing the facade's `setTimer`/`setPeriodic`.
///
/// Timer ids are process-unique and never reused. The handler receives the
/// timer id, so one callable can serve several timers.
#[derive(Clone)]
pub struct TimerCore {
    inner: Arc<TimerInner>,
}

impl TimerCore {
    pub fn new(handle: Handle) -> Self {
        Self {
            inner: Arc::new(TimerInner {
                active: DashMap::new(),
                next_id: AtomicU64::new(1),
                handle,
            }),
        }
    }

    fn arm(&self) -> (u64, Arc<AtomicBool>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        self.inner.active.insert(id, cancelled.clone());
        (id, cancelled)
    }

    /// Fire once after `delay_ms`, then forget the timer.
    pub fn set_timer(&self, delay_ms: u64, handler: SharedHandler<u64>) -> u64 {
        let (id, cancelled) = self.arm();
        let inner = self.inner.clone();
        self.inner.handle.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            inner.active.remove(&id);
            if !cancelled.load(Ordering::Acquire) {
                handler.handle(id);
            }
        });
        debug!(timer_id = id, delay_ms, "timer armed");
        id
    }

    /// Fire every `interval_ms` until cancelled.
    pub fn set_periodic(&self, interval_ms: u64, handler: SharedHandler<u64>) -> u64 {
        let (id, cancelled) = self.arm();
        self.inner.handle.spawn(async move {
            let period = Duration::from_millis(interval_ms.max(1));
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // completes immediately
            loop {
                ticker.tick().await;
                if cancelled.load(Ordering::Acquire) {
                    break;
                }
                handler.handle(id);
            }
        });
        debug!(timer_id = id, interval_ms, "periodic timer armed");
        id
    }

    /// Cancel a pending timer. Returns false for unknown or already-fired
    /// ids; cancelling twice is harmless.
    pub fn cancel(&self, id: u64) -> bool {
        if let Some((_, cancelled)) = self.inner.active.remove(&id) {
            cancelled.store(true, Ordering::Release);
            debug!(timer_id = id, "timer cancelled");
            true
        } else {
            false
        }
    }

    pub fn cancel_all(&self) {
        let ids: Vec<u64> = self.inner.active.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.cancel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::fn_handler;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn one_shot_fires_once_with_its_id() {
        let timers = TimerCore::new(Handle::current());
        let fired = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = fired.clone();
        let id = timers.set_timer(10, fn_handler(move |timer_id| sink.lock().push(timer_id)));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.lock().as_slice(), &[id]);
        // Already fired: cancel reports false.
        assert!(!timers.cancel(id));
    }

    #[tokio::test]
    async fn periodic_fires_until_cancelled() {
        let timers = TimerCore::new(Handle::current());
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = hits.clone();
        let id = timers.set_periodic(
            10,
            fn_handler(move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_millis(55)).await;
        assert!(timers.cancel(id));
        let at_cancel = hits.load(Ordering::SeqCst);
        assert!(at_cancel >= 2, "expected at least two ticks, got {at_cancel}");
        tokio::time::sleep(Duration::from_millis(40)).await;
        let after = hits.load(Ordering::SeqCst);
        assert!(after <= at_cancel + 1, "timer kept firing after cancel");
    }

    #[tokio::test]
    async fn cancel_before_firing_suppresses_the_handler() {
        let timers = TimerCore::new(Handle::current());
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = hits.clone();
        let id = timers.set_timer(
            40,
            fn_handler(move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
