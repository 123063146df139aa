//! Scheduled tasks for homesync.
//!
//! Everything in sync-core that depends on the passage of time (echo ledger
//! expiry, batch debounce) goes through the [`Scheduler`] trait instead of a
//! runtime timer. sync-client provides a tokio-backed implementation; tests use
//! [`ManualScheduler`], which only moves time when told to.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A deferred callback.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Source of time and deferred execution.
pub trait Scheduler: Send + Sync {
    /// Current instant on this scheduler's clock.
    fn now(&self) -> Instant;

    /// Run `task` once after `delay`, unless the returned handle is cancelled first.
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;
}

/// Cancellation handle for a scheduled task.
///
/// Dropping the handle does not cancel the task.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    /// Create a fresh, uncancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prevent the task from running if it has not run yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A single-slot, re-armable deferred callback.
///
/// Arming it again cancels whatever was armed before, which gives debounce
/// semantics: only the last arm within a quiet period fires. A callback that
/// fires clears the slot only if it is still the armed one.
pub struct DeferredTask {
    scheduler: Arc<dyn Scheduler>,
    slot: Arc<Mutex<DeferredSlot>>,
}

#[derive(Default)]
struct DeferredSlot {
    generation: u64,
    armed: Option<TaskHandle>,
}

impl DeferredTask {
    /// Create an unarmed deferred task on the given scheduler.
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            slot: Arc::new(Mutex::new(DeferredSlot::default())),
        }
    }

    /// Cancel any armed callback and arm `task` to run after `delay`.
    pub fn rearm(&self, delay: Duration, task: Task) {
        let mut slot = self.slot.lock();
        if let Some(previous) = slot.armed.take() {
            previous.cancel();
        }
        slot.generation += 1;

        let generation = slot.generation;
        let owner = Arc::downgrade(&self.slot);
        let fire: Task = Box::new(move || {
            if let Some(owner) = owner.upgrade() {
                let mut slot = owner.lock();
                if slot.generation == generation {
                    slot.armed = None;
                }
            }
            task();
        });
        slot.armed = Some(self.scheduler.schedule(delay, fire));
    }

    /// Cancel the armed callback, if any. Returns true if one was armed.
    pub fn cancel(&self) -> bool {
        match self.slot.lock().armed.take() {
            Some(handle) => {
                let was_live = !handle.is_cancelled();
                handle.cancel();
                was_live
            }
            None => false,
        }
    }

    /// Check if a callback is armed and not cancelled.
    pub fn is_armed(&self) -> bool {
        self.slot
            .lock()
            .armed
            .as_ref()
            .is_some_and(|handle| !handle.is_cancelled())
    }
}

struct ManualEntry {
    due: Duration,
    seq: u64,
    handle: TaskHandle,
    task: Task,
}

#[derive(Default)]
struct ManualInner {
    elapsed: Duration,
    next_seq: u64,
    queue: Vec<ManualEntry>,
}

/// Virtual-time scheduler for deterministic tests.
///
/// Time starts at the instant of construction and only advances through
/// [`advance`](Self::advance). Due tasks run in due-time order, ties broken by
/// scheduling order.
pub struct ManualScheduler {
    origin: Instant,
    inner: Mutex<ManualInner>,
}

impl ManualScheduler {
    /// Create a scheduler whose clock reads "now" until advanced.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            inner: Mutex::new(ManualInner::default()),
        }
    }

    /// Move the clock forward by `by`, running every task that becomes due.
    ///
    /// Tasks scheduled by running tasks are honoured if they fall due within
    /// the same window.
    pub fn advance(&self, by: Duration) {
        let target = self.inner.lock().elapsed + by;

        loop {
            let next = {
                let mut inner = self.inner.lock();
                let due_index = inner
                    .queue
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.due <= target)
                    .min_by_key(|(_, entry)| (entry.due, entry.seq))
                    .map(|(index, _)| index);

                match due_index {
                    Some(index) => {
                        let entry = inner.queue.swap_remove(index);
                        inner.elapsed = inner.elapsed.max(entry.due);
                        Some(entry)
                    }
                    None => {
                        inner.elapsed = target;
                        None
                    }
                }
            };

            // Run outside the lock: tasks may schedule more tasks.
            match next {
                Some(entry) if entry.handle.is_cancelled() => continue,
                Some(entry) => (entry.task)(),
                None => break,
            }
        }
    }

    /// Number of scheduled tasks that are not cancelled.
    pub fn pending(&self) -> usize {
        self.inner
            .lock()
            .queue
            .iter()
            .filter(|entry| !entry.handle.is_cancelled())
            .count()
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Instant {
        self.origin + self.inner.lock().elapsed
    }

    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let mut inner = self.inner.lock();
        let entry = ManualEntry {
            due: inner.elapsed + delay,
            seq: inner.next_seq,
            handle: handle.clone(),
            task,
        };
        inner.next_seq += 1;
        inner.queue.push(entry);
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Task) {
        let count = Arc::new(AtomicUsize::new(0));
        let make = {
            let count = count.clone();
            move || -> Task {
                let count = count.clone();
                Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            }
        };
        (count, make)
    }

    #[test]
    fn task_runs_only_when_due() {
        let scheduler = ManualScheduler::new();
        let (count, task) = counter();

        scheduler.schedule(Duration::from_millis(100), task());

        scheduler.advance(Duration::from_millis(99));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        scheduler.advance(Duration::from_millis(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn cancelled_task_never_runs() {
        let scheduler = ManualScheduler::new();
        let (count, task) = counter();

        let handle = scheduler.schedule(Duration::from_millis(10), task());
        handle.cancel();
        scheduler.advance(Duration::from_secs(1));

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn clock_advances() {
        let scheduler = ManualScheduler::new();
        let start = scheduler.now();

        scheduler.advance(Duration::from_millis(1500));

        assert_eq!(scheduler.now() - start, Duration::from_millis(1500));
    }

    #[test]
    fn tasks_run_in_due_order_and_see_their_due_time() {
        let scheduler = Arc::new(ManualScheduler::new());
        let start = scheduler.now();
        let log = Arc::new(Mutex::new(Vec::new()));

        for (label, delay) in [("late", 30u64), ("early", 10), ("mid", 20)] {
            let log = log.clone();
            let clock = scheduler.clone();
            scheduler.schedule(
                Duration::from_millis(delay),
                Box::new(move || log.lock().push((label, clock.now() - start))),
            );
        }

        scheduler.advance(Duration::from_millis(50));

        assert_eq!(
            *log.lock(),
            vec![
                ("early", Duration::from_millis(10)),
                ("mid", Duration::from_millis(20)),
                ("late", Duration::from_millis(30)),
            ]
        );
    }

    #[test]
    fn task_scheduled_by_task_runs_within_window() {
        let scheduler = Arc::new(ManualScheduler::new());
        let (count, task) = counter();
        let inner_task = task();

        let nested = scheduler.clone();
        scheduler.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                nested.schedule(Duration::from_millis(10), inner_task);
            }),
        );

        scheduler.advance(Duration::from_millis(25));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_task_rearm_replaces_previous() {
        let scheduler = Arc::new(ManualScheduler::new());
        let deferred = DeferredTask::new(scheduler.clone());
        let (count, task) = counter();

        deferred.rearm(Duration::from_millis(100), task());
        scheduler.advance(Duration::from_millis(60));
        deferred.rearm(Duration::from_millis(100), task());
        scheduler.advance(Duration::from_millis(60));

        // First arm was cancelled; second is not due yet.
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(deferred.is_armed());

        scheduler.advance(Duration::from_millis(40));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_task_cancel() {
        let scheduler = Arc::new(ManualScheduler::new());
        let deferred = DeferredTask::new(scheduler.clone());
        let (count, task) = counter();

        assert!(!deferred.cancel());
        deferred.rearm(Duration::from_millis(100), task());
        assert!(deferred.cancel());
        assert!(!deferred.is_armed());

        scheduler.advance(Duration::from_secs(1));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn deferred_task_disarms_after_firing() {
        let scheduler = Arc::new(ManualScheduler::new());
        let deferred = DeferredTask::new(scheduler.clone());
        let (count, task) = counter();

        deferred.rearm(Duration::from_millis(100), task());
        scheduler.advance(Duration::from_millis(100));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!deferred.is_armed());
    }

    /// Hands tasks back to the test instead of running them.
    #[derive(Default)]
    struct HeldScheduler {
        held: Mutex<Vec<Task>>,
    }

    impl Scheduler for HeldScheduler {
        fn now(&self) -> Instant {
            Instant::now()
        }

        fn schedule(&self, _delay: Duration, task: Task) -> TaskHandle {
            self.held.lock().push(task);
            TaskHandle::new()
        }
    }

    #[test]
    fn late_callback_keeps_newer_arm() {
        let scheduler = Arc::new(HeldScheduler::default());
        let deferred = DeferredTask::new(scheduler.clone());
        let (count, task) = counter();

        deferred.rearm(Duration::from_millis(100), task());
        // The first callback was already on its way when the second arm landed.
        deferred.rearm(Duration::from_millis(100), task());
        let first = scheduler.held.lock().remove(0);
        first();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(deferred.is_armed());
        assert!(deferred.cancel());
    }
}
