//! Optimistic value store for homesync.
//!
//! An in-memory table of the current believed value of every
//! [`AttributeKey`], tracking whether each entry is a local guess (an
//! unconfirmed write) or a server-confirmed fact.
//!
//! Entries move through this lifecycle:
//! 1. `apply_remote()` / `seed()` - server truth, `is_optimistic == false`
//! 2. `set_optimistic()` - local guess, the prior value kept in `previous_value`
//! 3. `confirm()` - the guess becomes the value; or
//!    `revert()` - the prior value is restored
//!
//! The store is the single writer of [`AttributeState`]. Every transition is
//! announced to observers after the internal lock has been released.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use homesync_types::{AccessoryId, AttributeKey, Value};

use crate::observers::{ObserverId, Observers};
use crate::timer::Scheduler;

/// The believed state of one attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeState {
    /// Current believed value.
    pub value: Value,
    /// When the value last changed.
    pub last_updated: Instant,
    /// True while a local write is unresolved.
    pub is_optimistic: bool,
    /// Value before the first unresolved local write.
    ///
    /// `None` while optimistic means the key had no value before the write.
    /// Always `None` when not optimistic.
    pub previous_value: Option<Value>,
}

/// What changed in the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    /// A local guess was applied.
    Optimistic {
        /// Affected key.
        key: AttributeKey,
    },
    /// A local guess was acknowledged.
    Confirmed {
        /// Affected key.
        key: AttributeKey,
    },
    /// A local guess was rolled back.
    Reverted {
        /// Affected key.
        key: AttributeKey,
    },
    /// Server truth was applied.
    Remote {
        /// Affected key.
        key: AttributeKey,
    },
    /// Reachability of an accessory changed.
    Reachability {
        /// Affected accessory.
        entity_id: AccessoryId,
        /// New reachability.
        is_reachable: bool,
    },
    /// Everything was dropped (session end).
    Cleared,
}

impl StoreChange {
    /// The accessory the change belongs to, if it is not a bulk change.
    pub fn entity_id(&self) -> Option<&AccessoryId> {
        match self {
            Self::Optimistic { key }
            | Self::Confirmed { key }
            | Self::Reverted { key }
            | Self::Remote { key } => Some(&key.entity_id),
            Self::Reachability { entity_id, .. } => Some(entity_id),
            Self::Cleared => None,
        }
    }
}

#[derive(Default)]
struct StoreInner {
    attributes: HashMap<AttributeKey, AttributeState>,
    reachability: HashMap<AccessoryId, bool>,
}

/// Optimistic value store.
pub struct OptimisticStore {
    clock: Arc<dyn Scheduler>,
    inner: Mutex<StoreInner>,
    observers: Observers<StoreChange>,
}

impl OptimisticStore {
    /// Create an empty store using `clock` for timestamps.
    pub fn new(clock: Arc<dyn Scheduler>) -> Self {
        Self {
            clock,
            inner: Mutex::new(StoreInner::default()),
            observers: Observers::new(),
        }
    }

    /// Apply a local guess for `key`.
    ///
    /// The value present before the first unresolved guess is kept as
    /// `previous_value`; further guesses before `confirm`/`revert` keep it.
    pub fn set_optimistic(&self, key: &AttributeKey, value: Value) {
        let now = self.clock.now();
        {
            let mut inner = self.inner.lock();
            match inner.attributes.get_mut(key) {
                Some(state) => {
                    if !state.is_optimistic {
                        state.previous_value = Some(state.value.clone());
                        state.is_optimistic = true;
                    }
                    state.value = value;
                    state.last_updated = now;
                }
                None => {
                    inner.attributes.insert(
                        key.clone(),
                        AttributeState {
                            value,
                            last_updated: now,
                            is_optimistic: true,
                            previous_value: None,
                        },
                    );
                }
            }
        }
        self.observers
            .notify(&StoreChange::Optimistic { key: key.clone() });
    }

    /// Accept the current guess for `key`. No-op if nothing is pending.
    pub fn confirm(&self, key: &AttributeKey) {
        let changed = {
            let mut inner = self.inner.lock();
            match inner.attributes.get_mut(key) {
                Some(state) if state.is_optimistic => {
                    state.is_optimistic = false;
                    state.previous_value = None;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.observers
                .notify(&StoreChange::Confirmed { key: key.clone() });
        }
    }

    /// Roll back the guess for `key` to the value before it. No-op if nothing
    /// is pending.
    ///
    /// A key that had no value before the guess is removed.
    pub fn revert(&self, key: &AttributeKey) {
        let now = self.clock.now();
        let changed = {
            let mut inner = self.inner.lock();
            match inner.attributes.get_mut(key) {
                Some(state) if state.is_optimistic => {
                    match state.previous_value.take() {
                        Some(previous) => {
                            state.value = previous;
                            state.is_optimistic = false;
                            state.last_updated = now;
                        }
                        None => {
                            inner.attributes.remove(key);
                        }
                    }
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.observers
                .notify(&StoreChange::Reverted { key: key.clone() });
        }
    }

    /// Apply server truth for `key`, discarding any unresolved guess.
    pub fn apply_remote(&self, key: &AttributeKey, value: Value) {
        let now = self.clock.now();
        self.inner.lock().attributes.insert(
            key.clone(),
            AttributeState {
                value,
                last_updated: now,
                is_optimistic: false,
                previous_value: None,
            },
        );
        self.observers.notify(&StoreChange::Remote { key: key.clone() });
    }

    /// Load an initial snapshot (the result of the pull query).
    ///
    /// Keys with an unresolved guess are skipped: the query may predate the
    /// write. Returns the number of keys applied.
    pub fn seed(&self, values: impl IntoIterator<Item = (AttributeKey, Value)>) -> usize {
        let now = self.clock.now();
        let applied: Vec<AttributeKey> = {
            let mut inner = self.inner.lock();
            let mut applied = Vec::new();
            for (key, value) in values {
                if inner
                    .attributes
                    .get(&key)
                    .is_some_and(|state| state.is_optimistic)
                {
                    continue;
                }
                inner.attributes.insert(
                    key.clone(),
                    AttributeState {
                        value,
                        last_updated: now,
                        is_optimistic: false,
                        previous_value: None,
                    },
                );
                applied.push(key);
            }
            applied
        };

        for key in &applied {
            self.observers.notify(&StoreChange::Remote { key: key.clone() });
        }
        applied.len()
    }

    /// Record reachability reported by the server.
    pub fn set_reachability(&self, entity_id: &AccessoryId, is_reachable: bool) {
        self.inner
            .lock()
            .reachability
            .insert(entity_id.clone(), is_reachable);
        self.observers.notify(&StoreChange::Reachability {
            entity_id: entity_id.clone(),
            is_reachable,
        });
    }

    /// Current believed value of `key`.
    pub fn read(&self, key: &AttributeKey) -> Option<Value> {
        self.inner
            .lock()
            .attributes
            .get(key)
            .map(|state| state.value.clone())
    }

    /// Full state of `key`.
    pub fn state(&self, key: &AttributeKey) -> Option<AttributeState> {
        self.inner.lock().attributes.get(key).cloned()
    }

    /// Check if `key` has an unresolved local write.
    pub fn is_pending(&self, key: &AttributeKey) -> bool {
        self.inner
            .lock()
            .attributes
            .get(key)
            .is_some_and(|state| state.is_optimistic)
    }

    /// Check if any attribute of `entity_id` has an unresolved local write.
    pub fn is_pending_for_entity(&self, entity_id: &AccessoryId) -> bool {
        self.inner
            .lock()
            .attributes
            .iter()
            .any(|(key, state)| state.is_optimistic && &key.entity_id == entity_id)
    }

    /// Last reported reachability of `entity_id`.
    pub fn is_reachable(&self, entity_id: &AccessoryId) -> Option<bool> {
        self.inner.lock().reachability.get(entity_id).copied()
    }

    /// All keys with an unresolved local write, sorted.
    pub fn pending_keys(&self) -> Vec<AttributeKey> {
        let mut keys: Vec<AttributeKey> = self
            .inner
            .lock()
            .attributes
            .iter()
            .filter(|(_, state)| state.is_optimistic)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Current values of every attribute of `entity_id`, sorted by name.
    pub fn entity_values(&self, entity_id: &AccessoryId) -> Vec<(String, Value)> {
        let mut values: Vec<(String, Value)> = self
            .inner
            .lock()
            .attributes
            .iter()
            .filter(|(key, _)| &key.entity_id == entity_id)
            .map(|(key, state)| (key.attribute.clone(), state.value.clone()))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        values
    }

    /// Number of attributes held.
    pub fn len(&self) -> usize {
        self.inner.lock().attributes.len()
    }

    /// Check if the store holds no attributes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every attribute and reachability entry (session end).
    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock();
            inner.attributes.clear();
            inner.reachability.clear();
        }
        self.observers.notify(&StoreChange::Cleared);
    }

    /// Register a re-render trigger.
    pub fn subscribe(
        &self,
        observer: impl Fn(&StoreChange) + Send + Sync + 'static,
    ) -> ObserverId {
        self.observers.subscribe(observer)
    }

    /// Remove a re-render trigger.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }
}
