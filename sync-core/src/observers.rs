//! Fan-out registry for callbacks.
//!
//! Used by the store (re-render triggers) and by the connection manager
//! (push message handlers). A callback that panics is isolated: the remaining
//! callbacks still receive the notification.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Identifier returned by [`Observers::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A list of callbacks over `T`.
pub struct Observers<T> {
    inner: Mutex<ObserversInner<T>>,
}

struct ObserversInner<T> {
    next_id: u64,
    callbacks: Vec<(ObserverId, Callback<T>)>,
}

impl<T> Observers<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ObserversInner {
                next_id: 0,
                callbacks: Vec::new(),
            }),
        }
    }

    /// Register a callback.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ObserverId {
        let mut inner = self.inner.lock();
        let id = ObserverId(inner.next_id);
        inner.next_id += 1;
        inner.callbacks.push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.callbacks.len();
        inner.callbacks.retain(|(existing, _)| *existing != id);
        inner.callbacks.len() != before
    }

    /// Deliver `value` to every callback, in registration order.
    ///
    /// The registry lock is not held while callbacks run, so a callback may
    /// subscribe or unsubscribe. Returns the number of callbacks that panicked.
    pub fn notify(&self, value: &T) -> usize {
        let snapshot: Vec<Callback<T>> = self
            .inner
            .lock()
            .callbacks
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        snapshot
            .iter()
            .filter(|callback| catch_unwind(AssertUnwindSafe(|| callback(value))).is_err())
            .count()
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.inner.lock().callbacks.len()
    }

    /// Check if no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}
