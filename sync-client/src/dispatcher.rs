//! Command dispatcher.
//!
//! Every write goes through the same sequence:
//!
//! 1. mark the key in the echo ledger
//! 2. apply the optimistic value to the store
//! 3. send the request over the request/response API
//! 4. confirm on success, revert on rejection, error or timeout; clear the mark
//!
//! Steps 1 and 2 run synchronously before the first await, so a push echo
//! that beats the response is always recognised as ours.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use homesync_core::{EchoLedger, OptimisticStore};
use homesync_types::{AccessoryId, AttributeKey, Value};

/// Default upper bound on a single write round trip.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the request/response write API.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The request could not be delivered or the response could not be read.
    #[error("write transport failed: {0}")]
    Transport(String),

    /// The server answered with an error payload.
    #[error("server error: {0}")]
    Server(String),
}

/// Server answer to a single attribute write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResponse {
    /// Whether the home accepted the write
    pub success: bool,
}

/// Server answer to a group write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupWriteResponse {
    /// Whether the home accepted the write
    pub success: bool,
    /// Number of accessories the server changed
    pub affected_count: u32,
}

/// The request/response write API (independent of the push channel).
#[async_trait]
pub trait WriteApi: Send + Sync {
    /// Write one attribute.
    async fn write(&self, key: &AttributeKey, value: &Value)
        -> Result<WriteResponse, WriteError>;

    /// Write `attribute` on every member of a group in one request.
    async fn write_group(
        &self,
        group_id: &str,
        attribute: &str,
        value: &Value,
    ) -> Result<GroupWriteResponse, WriteError>;
}

/// A named set of accessories addressed by one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteGroup {
    /// Server-side group id
    pub id: String,
    /// Accessories the group fans out to
    pub members: Vec<AccessoryId>,
}

/// How a write resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Acknowledged; the optimistic value stands.
    Confirmed,
    /// The server answered `success: false`; the value was reverted.
    Rejected,
    /// Transport error or timeout; the value was reverted.
    Failed {
        /// What went wrong
        reason: String,
    },
}

impl WriteOutcome {
    /// Check if the optimistic value was kept.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

/// Result of a group write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupWriteOutcome {
    /// Outcome applied to every member key
    pub outcome: WriteOutcome,
    /// Number of keys that were written optimistically
    pub keys: usize,
    /// Accessories the server reported as changed (0 unless confirmed)
    pub affected_count: u32,
}

/// Runs writes through ledger, store and API.
pub struct CommandDispatcher<W> {
    api: W,
    store: Arc<OptimisticStore>,
    ledger: Arc<EchoLedger>,
    write_timeout: Duration,
}

impl<W: WriteApi> CommandDispatcher<W> {
    /// Create a dispatcher.
    pub fn new(
        api: W,
        store: Arc<OptimisticStore>,
        ledger: Arc<EchoLedger>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            api,
            store,
            ledger,
            write_timeout,
        }
    }

    /// Write one attribute optimistically.
    ///
    /// The write is never cancelled: it always resolves to confirm or revert.
    pub async fn dispatch_write(
        &self,
        entity_id: &AccessoryId,
        attribute: &str,
        value: Value,
    ) -> WriteOutcome {
        let key = AttributeKey::new(entity_id.clone(), attribute);
        self.ledger.mark_local(&key);
        self.store.set_optimistic(&key, value.clone());
        debug!(%key, "dispatching write");

        let request = self.api.write(&key, &value);
        let outcome = match tokio::time::timeout(self.write_timeout, request).await {
            Ok(Ok(response)) if response.success => WriteOutcome::Confirmed,
            Ok(Ok(_)) => WriteOutcome::Rejected,
            Ok(Err(e)) => WriteOutcome::Failed {
                reason: e.to_string(),
            },
            Err(_) => WriteOutcome::Failed {
                reason: format!("timed out after {:?}", self.write_timeout),
            },
        };

        self.resolve(std::slice::from_ref(&key), &outcome);
        outcome
    }

    /// Write `attribute` on every member of `group` with a single request.
    ///
    /// All member keys are marked and applied before the request goes out,
    /// and the one combined response resolves all of them.
    pub async fn dispatch_group_write(
        &self,
        group: &WriteGroup,
        attribute: &str,
        value: Value,
    ) -> GroupWriteOutcome {
        let keys: Vec<AttributeKey> = group
            .members
            .iter()
            .map(|member| AttributeKey::new(member.clone(), attribute))
            .collect();
        for key in &keys {
            self.ledger.mark_local(key);
            self.store.set_optimistic(key, value.clone());
        }
        debug!(group = %group.id, attribute, keys = keys.len(), "dispatching group write");

        let request = self.api.write_group(&group.id, attribute, &value);
        let response = tokio::time::timeout(self.write_timeout, request).await;
        let (outcome, affected_count) = match response {
            Ok(Ok(response)) if response.success => {
                (WriteOutcome::Confirmed, response.affected_count)
            }
            Ok(Ok(_)) => (WriteOutcome::Rejected, 0),
            Ok(Err(e)) => (
                WriteOutcome::Failed {
                    reason: e.to_string(),
                },
                0,
            ),
            Err(_) => (
                WriteOutcome::Failed {
                    reason: format!("timed out after {:?}", self.write_timeout),
                },
                0,
            ),
        };

        self.resolve(&keys, &outcome);
        GroupWriteOutcome {
            outcome,
            keys: keys.len(),
            affected_count,
        }
    }

    fn resolve(&self, keys: &[AttributeKey], outcome: &WriteOutcome) {
        for key in keys {
            match outcome {
                WriteOutcome::Confirmed => self.store.confirm(key),
                WriteOutcome::Rejected | WriteOutcome::Failed { .. } => self.store.revert(key),
            }
            self.ledger.clear(key);
        }

        match outcome {
            WriteOutcome::Confirmed => debug!(keys = keys.len(), "write confirmed"),
            WriteOutcome::Rejected => warn!(keys = keys.len(), "write rejected; reverted"),
            WriteOutcome::Failed { reason } => {
                warn!(keys = keys.len(), %reason, "write failed; reverted")
            }
        }
    }

    /// Access the write API (for testing).
    pub fn api(&self) -> &W {
        &self.api
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TokioScheduler;
    use homesync_core::EchoConfig;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Scripted API: answers in order, optionally after a delay.
    #[derive(Default)]
    struct ScriptedApi {
        replies: Mutex<VecDeque<Result<bool, String>>>,
        delay: Option<Duration>,
        writes: Mutex<Vec<(String, Value)>>,
        observed: Mutex<Vec<Option<Value>>>,
        store: Option<Arc<OptimisticStore>>,
    }

    impl ScriptedApi {
        fn replying(replies: Vec<Result<bool, String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            }
        }

        fn next_reply(&self) -> Result<bool, WriteError> {
            self.replies
                .lock()
                .pop_front()
                .unwrap_or(Ok(true))
                .map_err(WriteError::Transport)
        }
    }

    #[async_trait]
    impl WriteApi for ScriptedApi {
        async fn write(
            &self,
            key: &AttributeKey,
            value: &Value,
        ) -> Result<WriteResponse, WriteError> {
            self.writes.lock().push((key.to_string(), value.clone()));
            if let Some(store) = &self.store {
                self.observed.lock().push(store.read(key));
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(WriteResponse {
                success: self.next_reply()?,
            })
        }

        async fn write_group(
            &self,
            group_id: &str,
            attribute: &str,
            value: &Value,
        ) -> Result<GroupWriteResponse, WriteError> {
            self.writes
                .lock()
                .push((format!("{group_id}:{attribute}"), value.clone()));
            let success = self.next_reply()?;
            Ok(GroupWriteResponse {
                success,
                affected_count: if success { 3 } else { 0 },
            })
        }
    }

    struct Harness {
        store: Arc<OptimisticStore>,
        ledger: Arc<EchoLedger>,
    }

    fn harness() -> Harness {
        let scheduler = Arc::new(TokioScheduler::current());
        Harness {
            store: Arc::new(OptimisticStore::new(scheduler.clone())),
            ledger: Arc::new(EchoLedger::new(scheduler, EchoConfig::default())),
        }
    }

    fn dispatcher(h: &Harness, api: ScriptedApi) -> CommandDispatcher<ScriptedApi> {
        CommandDispatcher::new(api, h.store.clone(), h.ledger.clone(), DEFAULT_WRITE_TIMEOUT)
    }

    #[tokio::test(start_paused = true)]
    async fn successful_write_confirms() {
        let h = harness();
        let key = AttributeKey::new("dev1", "power");
        h.store.apply_remote(&key, json!(false));
        let dispatcher = dispatcher(&h, ScriptedApi::replying(vec![Ok(true)]));

        let outcome = dispatcher
            .dispatch_write(&AccessoryId::new("dev1"), "power", json!(true))
            .await;

        assert_eq!(outcome, WriteOutcome::Confirmed);
        assert_eq!(h.store.read(&key), Some(json!(true)));
        assert!(!h.store.is_pending(&key));
        assert!(h.ledger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_write_reverts() {
        let h = harness();
        let key = AttributeKey::new("dev1", "brightness");
        h.store.apply_remote(&key, json!(40));
        let dispatcher = dispatcher(&h, ScriptedApi::replying(vec![Ok(false)]));

        let outcome = dispatcher
            .dispatch_write(&AccessoryId::new("dev1"), "brightness", json!(80))
            .await;

        assert_eq!(outcome, WriteOutcome::Rejected);
        assert_eq!(h.store.read(&key), Some(json!(40)));
        assert!(!h.store.is_pending(&key));
        assert!(h.ledger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_reverts() {
        let h = harness();
        let key = AttributeKey::new("dev1", "power");
        h.store.apply_remote(&key, json!(false));
        let dispatcher = dispatcher(
            &h,
            ScriptedApi::replying(vec![Err("connection reset".into())]),
        );

        let outcome = dispatcher
            .dispatch_write(&AccessoryId::new("dev1"), "power", json!(true))
            .await;

        match outcome {
            WriteOutcome::Failed { reason } => assert!(reason.contains("connection reset")),
            other => panic!("Expected Failed, got {:?}", other),
        }
        assert_eq!(h.store.read(&key), Some(json!(false)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_write_times_out_and_reverts() {
        let h = harness();
        let key = AttributeKey::new("dev1", "power");
        h.store.apply_remote(&key, json!(false));
        let api = ScriptedApi {
            delay: Some(Duration::from_secs(30)),
            ..ScriptedApi::default()
        };
        let dispatcher = dispatcher(&h, api);

        let outcome = dispatcher
            .dispatch_write(&AccessoryId::new("dev1"), "power", json!(true))
            .await;

        assert!(matches!(outcome, WriteOutcome::Failed { .. }));
        assert_eq!(h.store.read(&key), Some(json!(false)));
        assert!(!h.store.is_pending(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn mark_and_optimistic_value_precede_request() {
        let h = harness();
        let key = AttributeKey::new("dev1", "power");
        let api = ScriptedApi {
            store: Some(h.store.clone()),
            ..ScriptedApi::default()
        };
        let dispatcher = dispatcher(&h, api);
        let ledger = h.ledger.clone();

        let outcome = dispatcher
            .dispatch_write(&AccessoryId::new("dev1"), "power", json!(true))
            .await;

        assert!(outcome.is_confirmed());
        // The API saw the optimistic value already in the store.
        assert_eq!(*dispatcher.api().observed.lock(), vec![Some(json!(true))]);
        assert!(!ledger.should_suppress(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn ledger_suppresses_echo_while_in_flight() {
        let h = harness();
        let key = AttributeKey::new("dev1", "power");
        let api = ScriptedApi {
            delay: Some(Duration::from_millis(500)),
            ..ScriptedApi::default()
        };
        let dispatcher = Arc::new(dispatcher(&h, api));

        let task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch_write(&AccessoryId::new("dev1"), "power", json!(true))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(h.ledger.should_suppress(&key));
        assert!(h.store.is_pending(&key));

        assert_eq!(task.await.unwrap(), WriteOutcome::Confirmed);
        assert!(!h.ledger.should_suppress(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn group_write_resolves_every_member() {
        let h = harness();
        let group = WriteGroup {
            id: "living-room-lights".into(),
            members: vec![
                AccessoryId::new("lamp-1"),
                AccessoryId::new("lamp-2"),
                AccessoryId::new("lamp-3"),
            ],
        };
        for member in &group.members {
            h.store
                .apply_remote(&AttributeKey::new(member.clone(), "power"), json!(true));
        }
        let dispatcher = dispatcher(&h, ScriptedApi::replying(vec![Ok(true)]));

        let result = dispatcher
            .dispatch_group_write(&group, "power", json!(false))
            .await;

        assert_eq!(result.outcome, WriteOutcome::Confirmed);
        assert_eq!(result.keys, 3);
        assert_eq!(result.affected_count, 3);
        assert_eq!(dispatcher.api().writes.lock().len(), 1);
        for member in &group.members {
            let key = AttributeKey::new(member.clone(), "power");
            assert_eq!(h.store.read(&key), Some(json!(false)));
            assert!(!h.store.is_pending(&key));
        }
        assert!(h.ledger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_group_write_reverts_every_member() {
        let h = harness();
        let group = WriteGroup {
            id: "bedroom".into(),
            members: vec![AccessoryId::new("a"), AccessoryId::new("b")],
        };
        h.store
            .apply_remote(&AttributeKey::new("a", "power"), json!(true));
        let dispatcher = dispatcher(&h, ScriptedApi::replying(vec![Ok(false)]));

        let result = dispatcher
            .dispatch_group_write(&group, "power", json!(false))
            .await;

        assert_eq!(result.outcome, WriteOutcome::Rejected);
        assert_eq!(result.affected_count, 0);
        assert_eq!(
            h.store.read(&AttributeKey::new("a", "power")),
            Some(json!(true))
        );
        // "b" had no value before the write.
        assert_eq!(h.store.read(&AttributeKey::new("b", "power")), None);
        assert!(h.store.pending_keys().is_empty());
    }
}
