//! Reconciliation of push notices.
//!
//! Each accepted notice is applied to the [`OptimisticStore`] immediately and
//! queued for the durable cache. The queue is flushed on a debounce: every
//! enqueue restarts the timer, so a burst (a scene switching ten devices)
//! costs one cache pass instead of ten.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;

use homesync_types::{AccessoryId, AttributeKey, PushMessage, Value};

use crate::cache::{CacheBatch, PendingCacheUpdate, QueryCache};
use crate::ledger::EchoLedger;
use crate::store::OptimisticStore;
use crate::timer::{DeferredTask, Scheduler};

/// Default quiet period before a flush.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Attribute name under which reachability is looked up in the echo ledger.
pub const REACHABILITY_ATTRIBUTE: &str = "isReachable";

/// What happened to a push notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeOutcome {
    /// Applied to the store and queued for the cache
    Applied,
    /// Dropped as an echo of a recent local write
    Suppressed,
}

/// Folds push notices into the store and, batched, into the query cache.
pub struct Reconciler {
    store: Arc<OptimisticStore>,
    ledger: Arc<EchoLedger>,
    cache: Arc<dyn QueryCache>,
    debounce: Duration,
    queue: Mutex<Vec<PendingCacheUpdate>>,
    flush_timer: DeferredTask,
    this: Weak<Reconciler>,
}

impl Reconciler {
    /// Create a reconciler.
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        store: Arc<OptimisticStore>,
        ledger: Arc<EchoLedger>,
        cache: Arc<dyn QueryCache>,
        debounce: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            store,
            ledger,
            cache,
            debounce,
            queue: Mutex::new(Vec::new()),
            flush_timer: DeferredTask::new(scheduler),
            this: this.clone(),
        })
    }

    /// Handle an attribute change pushed by the server.
    pub fn on_attribute_notice(
        &self,
        entity_id: &AccessoryId,
        attribute: &str,
        value: Value,
    ) -> NoticeOutcome {
        let key = AttributeKey::new(entity_id.clone(), attribute);
        if self.ledger.should_suppress(&key) {
            return NoticeOutcome::Suppressed;
        }

        self.store.apply_remote(&key, value.clone());
        self.enqueue(PendingCacheUpdate::Attribute {
            entity_id: entity_id.clone(),
            attribute: attribute.to_string(),
            value,
        });
        NoticeOutcome::Applied
    }

    /// Handle a reachability change pushed by the server.
    pub fn on_reachability_notice(
        &self,
        entity_id: &AccessoryId,
        is_reachable: bool,
    ) -> NoticeOutcome {
        let key = AttributeKey::new(entity_id.clone(), REACHABILITY_ATTRIBUTE);
        if self.ledger.should_suppress(&key) {
            return NoticeOutcome::Suppressed;
        }

        self.store.set_reachability(entity_id, is_reachable);
        self.enqueue(PendingCacheUpdate::Reachability {
            entity_id: entity_id.clone(),
            is_reachable,
        });
        NoticeOutcome::Applied
    }

    /// Route a decoded push message. Returns `None` for messages that carry
    /// no device state.
    pub fn on_push(&self, message: &PushMessage) -> Option<NoticeOutcome> {
        match message {
            PushMessage::CharacteristicUpdate {
                accessory_id,
                characteristic_type,
                value,
            } => Some(self.on_attribute_notice(accessory_id, characteristic_type, value.clone())),
            PushMessage::ReachabilityUpdate {
                accessory_id,
                is_reachable,
            } => Some(self.on_reachability_notice(accessory_id, *is_reachable)),
            PushMessage::Ping | PushMessage::Pong | PushMessage::Connected { .. } => None,
        }
    }

    fn enqueue(&self, update: PendingCacheUpdate) {
        self.queue.lock().push(update);

        let this = self.this.clone();
        self.flush_timer.rearm(
            self.debounce,
            Box::new(move || {
                if let Some(this) = this.upgrade() {
                    this.flush();
                }
            }),
        );
    }

    /// Fold every queued update into the cache in one pass.
    ///
    /// Returns the number of updates flushed.
    pub fn flush(&self) -> usize {
        let updates = std::mem::take(&mut *self.queue.lock());
        if updates.is_empty() {
            return 0;
        }

        let batch = CacheBatch::from_updates(updates);
        self.cache.apply_batch(&batch);
        batch.update_count
    }

    /// Cancel the pending flush timer and flush synchronously.
    ///
    /// Called on disconnect so no accepted notice is lost.
    pub fn shutdown(&self) -> usize {
        self.flush_timer.cancel();
        self.flush()
    }

    /// Number of updates waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Check if a flush is scheduled.
    pub fn flush_scheduled(&self) -> bool {
        self.flush_timer.is_armed()
    }
}

// Accepted notices must reach the cache even without an explicit shutdown.
impl Drop for Reconciler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
