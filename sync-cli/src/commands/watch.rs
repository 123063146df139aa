//! Watch live accessory updates on the push channel.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use homesync_client::{
    CredentialProvider, GroupWriteResponse, HubClient, HubConfig, WriteApi, WriteError,
    WriteResponse, WsTransport,
};
use homesync_core::{HubEvent, MemoryQueryCache, OptimisticStore, StoreChange};
use homesync_types::{AttributeKey, Credential, Value};

/// Token taken from the configuration file or command line.
struct ConfiguredToken(Option<Credential>);

impl CredentialProvider for ConfiguredToken {
    fn credential(&self) -> Option<Credential> {
        self.0.clone()
    }
}

/// The watcher never writes.
struct ReadOnlyApi;

#[async_trait]
impl WriteApi for ReadOnlyApi {
    async fn write(
        &self,
        _key: &AttributeKey,
        _value: &Value,
    ) -> Result<WriteResponse, WriteError> {
        Err(WriteError::Transport("read-only session".into()))
    }

    async fn write_group(
        &self,
        _group_id: &str,
        _attribute: &str,
        _value: &Value,
    ) -> Result<GroupWriteResponse, WriteError> {
        Err(WriteError::Transport("read-only session".into()))
    }
}

/// Run the watch command until Ctrl-C or `seconds` elapse.
pub async fn run(config: HubConfig, seconds: Option<u64>) -> Result<()> {
    let cache = Arc::new(MemoryQueryCache::new());
    let token = ConfiguredToken(config.connection.token.clone().map(Credential::new));
    let client = HubClient::new(
        &config,
        WsTransport::new(),
        ReadOnlyApi,
        cache.clone(),
        Arc::new(token),
    )?;

    let store = Arc::downgrade(client.store());
    client.subscribe(move |change| {
        if let Some(line) = describe_change(&store, change) {
            println!("{line}");
        }
    });

    let mut events = client.events();
    client
        .connect()
        .context("No token configured. Pass --token or set HOMESYNC_TOKEN.")?;
    println!("Watching {} (Ctrl-C to stop)", config.connection.endpoint);

    let deadline = async {
        match seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = &mut deadline => break,
            event = events.recv() => match event {
                Ok(event) => {
                    println!("[hub] {}", describe_event(&event));
                    if matches!(event, HubEvent::CredentialRejected | HubEvent::GaveUp { .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "hub events dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.disconnect();
    println!();
    println!(
        "Stopped. {} accessories seen, {} cache passes.",
        cache.len(),
        cache.passes()
    );
    Ok(())
}

fn describe_change(store: &Weak<OptimisticStore>, change: &StoreChange) -> Option<String> {
    let store = store.upgrade()?;
    let line = match change {
        StoreChange::Remote { key } => {
            let value = store.read(key).unwrap_or(Value::Null);
            format!("{key} = {value}")
        }
        StoreChange::Reachability {
            entity_id,
            is_reachable,
        } => {
            let status = if *is_reachable { "reachable" } else { "unreachable" };
            format!("{entity_id} is {status}")
        }
        StoreChange::Cleared => "store cleared".to_string(),
        // Local writes are not possible from here.
        _ => return None,
    };
    Some(line)
}

fn describe_event(event: &HubEvent) -> String {
    match event {
        HubEvent::Connected => "connected".to_string(),
        HubEvent::Disconnected { reason } => format!("disconnected: {reason}"),
        HubEvent::ConnectionLost {
            attempt,
            retry_in,
            error,
        } => format!(
            "connection lost ({error}), retry {attempt} in {}ms",
            retry_in.as_millis()
        ),
        HubEvent::CredentialRejected => "token rejected, sign in again".to_string(),
        HubEvent::GaveUp { attempts, error } => {
            format!("gave up after {attempts} retries: {error}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_lost_connection() {
        let event = HubEvent::ConnectionLost {
            attempt: 2,
            retry_in: Duration::from_secs(2),
            error: "closed with code 1006".into(),
        };
        assert_eq!(
            describe_event(&event),
            "connection lost (closed with code 1006), retry 2 in 2000ms"
        );
    }

    #[test]
    fn dropped_store_yields_nothing() {
        let change = StoreChange::Cleared;
        assert!(describe_change(&Weak::new(), &change).is_none());
    }

    #[tokio::test]
    async fn read_only_api_refuses_writes() {
        let key = AttributeKey::new("dev1", "power");
        let result = ReadOnlyApi.write(&key, &Value::Bool(true)).await;
        assert!(matches!(result, Err(WriteError::Transport(_))));
    }
}
