//! Echo suppression ledger.
//!
//! A short-lived record of attributes this client just wrote. The push
//! handler consults it to tell "the server echoing my own write" apart from
//! "a change made elsewhere". Write requests and push notices share no
//! request id, so correlation is by key identity and proximity in time only.
//!
//! Entries evict themselves through a scheduled task after [`EchoConfig::ttl`];
//! nothing sweeps the table.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use homesync_types::AttributeKey;

use crate::timer::{Scheduler, TaskHandle};

/// Default lifetime of a ledger entry.
pub const DEFAULT_ECHO_TTL: Duration = Duration::from_millis(2000);

/// Default age below which a push notice counts as our own echo.
pub const DEFAULT_SUPPRESS_WINDOW: Duration = Duration::from_millis(1500);

/// Timing for echo suppression.
///
/// `suppress_window` should stay below `ttl` so an entry is never consulted
/// right at its eviction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoConfig {
    /// How long a mark lives before it evicts itself
    pub ttl: Duration,
    /// Age threshold used by the push handler
    pub suppress_window: Duration,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_ECHO_TTL,
            suppress_window: DEFAULT_SUPPRESS_WINDOW,
        }
    }
}

struct LedgerEntry {
    inserted_at: Instant,
    mark: u64,
    eviction: TaskHandle,
}

#[derive(Default)]
struct LedgerInner {
    next_mark: u64,
    entries: HashMap<AttributeKey, LedgerEntry>,
}

/// Echo suppression ledger.
pub struct EchoLedger {
    scheduler: Arc<dyn Scheduler>,
    config: EchoConfig,
    inner: Arc<Mutex<LedgerInner>>,
}

impl EchoLedger {
    /// Create an empty ledger.
    pub fn new(scheduler: Arc<dyn Scheduler>, config: EchoConfig) -> Self {
        Self {
            scheduler,
            config,
            inner: Arc::new(Mutex::new(LedgerInner::default())),
        }
    }

    /// Timing in use.
    pub fn config(&self) -> EchoConfig {
        self.config
    }

    /// Record a local write to `key`, or refresh an existing record.
    ///
    /// Must be called before the write request is sent.
    pub fn mark_local(&self, key: &AttributeKey) {
        let now = self.scheduler.now();
        let mut inner = self.inner.lock();
        let mark = inner.next_mark;
        inner.next_mark += 1;

        let weak: Weak<Mutex<LedgerInner>> = Arc::downgrade(&self.inner);
        let evict_key = key.clone();
        let eviction = self.scheduler.schedule(
            self.config.ttl,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let mut inner = inner.lock();
                    // An older eviction must not remove a refreshed entry.
                    if inner
                        .entries
                        .get(&evict_key)
                        .is_some_and(|entry| entry.mark == mark)
                    {
                        inner.entries.remove(&evict_key);
                    }
                }
            }),
        );

        let previous = inner.entries.insert(
            key.clone(),
            LedgerEntry {
                inserted_at: now,
                mark,
                eviction,
            },
        );
        if let Some(previous) = previous {
            previous.eviction.cancel();
        }
    }

    /// Check if `key` was marked less than `within` ago.
    pub fn is_recent_local(&self, key: &AttributeKey, within: Duration) -> bool {
        let now = self.scheduler.now();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| now.saturating_duration_since(entry.inserted_at) < within)
    }

    /// [`is_recent_local`](Self::is_recent_local) with the configured window.
    pub fn should_suppress(&self, key: &AttributeKey) -> bool {
        self.is_recent_local(key, self.config.suppress_window)
    }

    /// Drop the record for `key` once its write has resolved.
    pub fn clear(&self, key: &AttributeKey) {
        if let Some(entry) = self.inner.lock().entries.remove(key) {
            entry.eviction.cancel();
        }
    }

    /// Drop every record (session end).
    pub fn clear_all(&self) {
        for (_, entry) in self.inner.lock().entries.drain() {
            entry.eviction.cancel();
        }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if the ledger holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
