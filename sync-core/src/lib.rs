//! # sync-core
//!
//! Pure logic for homesync (no network I/O, virtual-time tests).
//!
//! This crate implements the state machines and stores behind the client's
//! optimistic UI without any network I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! Nothing in this crate opens a socket or sleeps:
//! - The connection lifecycle is a pure state machine producing [`Action`]s
//! - Anything time-dependent (echo expiry, batch debounce) goes through the
//!   [`Scheduler`] trait, driven by [`ManualScheduler`] in tests
//! - Stores are plain in-memory tables with observer fan-out
//!
//! The actual I/O (push channel, write requests) is performed by
//! `sync-client`, which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod ledger;
pub mod observers;
pub mod reconcile;
pub mod state;
pub mod store;
pub mod timer;

pub use cache::{
    CacheBatch, EntityPatch, EntitySnapshot, MemoryQueryCache, PendingCacheUpdate, QueryCache,
};
pub use ledger::{EchoConfig, EchoLedger, DEFAULT_ECHO_TTL, DEFAULT_SUPPRESS_WINDOW};
pub use observers::{ObserverId, Observers};
pub use reconcile::{NoticeOutcome, Reconciler, DEFAULT_DEBOUNCE, REACHABILITY_ATTRIBUTE};
pub use state::{Action, BackoffPolicy, ConnectionState, Event, FailureReason, HubEvent};
pub use store::{AttributeState, OptimisticStore, StoreChange};
pub use timer::{DeferredTask, ManualScheduler, Scheduler, Task, TaskHandle};
