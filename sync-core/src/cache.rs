//! Durable query cache boundary.
//!
//! The cache is owned by the query layer; homesync only writes to it, and
//! only through [`QueryCache::apply_batch`] from the reconciler's flush. It is
//! never read for decisions.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use homesync_types::{AccessoryId, Value};

/// One accepted push notice waiting to be folded into the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingCacheUpdate {
    /// An attribute value changed
    Attribute {
        /// Accessory that changed
        entity_id: AccessoryId,
        /// Attribute that changed
        attribute: String,
        /// New value
        value: Value,
    },
    /// Reachability changed
    Reachability {
        /// Accessory whose reachability changed
        entity_id: AccessoryId,
        /// New reachability
        is_reachable: bool,
    },
}

impl PendingCacheUpdate {
    /// The accessory this update targets.
    pub fn entity_id(&self) -> &AccessoryId {
        match self {
            Self::Attribute { entity_id, .. } | Self::Reachability { entity_id, .. } => entity_id,
        }
    }
}

/// All changes for one accessory within a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityPatch {
    /// Accessory being patched
    pub entity_id: AccessoryId,
    /// Attribute values, in first-seen order; a later update to the same
    /// attribute replaces the earlier value in place
    pub attributes: Vec<(String, Value)>,
    /// Latest reachability, if reported in this batch
    pub is_reachable: Option<bool>,
}

impl EntityPatch {
    fn new(entity_id: AccessoryId) -> Self {
        Self {
            entity_id,
            attributes: Vec::new(),
            is_reachable: None,
        }
    }

    fn set_attribute(&mut self, attribute: String, value: Value) {
        match self.attributes.iter_mut().find(|(name, _)| *name == attribute) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((attribute, value)),
        }
    }
}

/// Queued updates grouped by accessory for a single cache pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheBatch {
    /// One patch per accessory, in first-seen order
    pub patches: Vec<EntityPatch>,
    /// Number of queued updates folded into this batch
    pub update_count: usize,
}

impl CacheBatch {
    /// Group `updates` by accessory, preserving insertion order.
    pub fn from_updates(updates: impl IntoIterator<Item = PendingCacheUpdate>) -> Self {
        let mut patches: Vec<EntityPatch> = Vec::new();
        let mut index: HashMap<AccessoryId, usize> = HashMap::new();
        let mut update_count = 0;

        for update in updates {
            update_count += 1;
            let slot = *index.entry(update.entity_id().clone()).or_insert_with(|| {
                patches.push(EntityPatch::new(update.entity_id().clone()));
                patches.len() - 1
            });
            let patch = &mut patches[slot];

            match update {
                PendingCacheUpdate::Attribute {
                    attribute, value, ..
                } => patch.set_attribute(attribute, value),
                PendingCacheUpdate::Reachability { is_reachable, .. } => {
                    patch.is_reachable = Some(is_reachable)
                }
            }
        }

        Self {
            patches,
            update_count,
        }
    }

    /// Check if the batch carries no changes.
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

/// The externally owned, eventually consistent query cache.
pub trait QueryCache: Send + Sync {
    /// Fold one batch into the cache in a single read-modify-write pass.
    fn apply_batch(&self, batch: &CacheBatch);
}

/// Cached view of one accessory.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntitySnapshot {
    /// Attribute values by name
    pub attributes: BTreeMap<String, Value>,
    /// Last known reachability
    pub is_reachable: Option<bool>,
}

/// In-memory [`QueryCache`], used by the CLI and by tests.
#[derive(Default)]
pub struct MemoryQueryCache {
    inner: Mutex<MemoryCacheInner>,
}

#[derive(Default)]
struct MemoryCacheInner {
    entities: HashMap<AccessoryId, EntitySnapshot>,
    passes: usize,
}

impl MemoryQueryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached view of `entity_id`.
    pub fn entity(&self, entity_id: &AccessoryId) -> Option<EntitySnapshot> {
        self.inner.lock().entities.get(entity_id).cloned()
    }

    /// Number of batches applied so far.
    pub fn passes(&self) -> usize {
        self.inner.lock().passes
    }

    /// Number of accessories cached.
    pub fn len(&self) -> usize {
        self.inner.lock().entities.len()
    }

    /// Check if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QueryCache for MemoryQueryCache {
    fn apply_batch(&self, batch: &CacheBatch) {
        let mut inner = self.inner.lock();
        inner.passes += 1;
        for patch in &batch.patches {
            let snapshot = inner.entities.entry(patch.entity_id.clone()).or_default();
            for (attribute, value) in &patch.attributes {
                snapshot.attributes.insert(attribute.clone(), value.clone());
            }
            if let Some(is_reachable) = patch.is_reachable {
                snapshot.is_reachable = Some(is_reachable);
            }
        }
    }
}
