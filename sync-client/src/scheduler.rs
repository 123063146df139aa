//! Tokio-backed [`Scheduler`] for sync-core's time-dependent pieces.

use std::time::{Duration, Instant};
use tokio::runtime::Handle;

use homesync_core::{Scheduler, Task, TaskHandle};

/// Runs scheduled tasks on a tokio runtime.
///
/// Time comes from `tokio::time`, so paused-clock tests drive echo expiry
/// and batch debounce along with everything else.
#[derive(Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    /// Use the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn current() -> Self {
        Self {
            runtime: Handle::current(),
        }
    }

    /// Use an explicit runtime handle.
    pub fn with_handle(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let guard = handle.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !guard.is_cancelled() {
                task();
            }
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn task_fires_after_delay() {
        let scheduler = TokioScheduler::current();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        scheduler.schedule(
            Duration::from_millis(100),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_does_not_fire() {
        let scheduler = TokioScheduler::current();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        let handle = scheduler.schedule(
            Duration::from_millis(100),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        handle.cancel();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clock_follows_paused_time() {
        let scheduler = TokioScheduler::current();
        let start = scheduler.now();

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(scheduler.now() - start, Duration::from_secs(5));
    }
}
