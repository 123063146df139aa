//! WebSocket transport against a local tungstenite server.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use homesync_client::{
    Frame, GroupWriteResponse, HubClient, HubConfig, Transport, WriteApi, WriteError,
    WriteResponse, WsTransport,
};
use homesync_core::{ConnectionState, MemoryQueryCache};
use homesync_types::{AccessoryId, AttributeKey, Credential, Value};

/// Accept one connection on an ephemeral port and hand it to `handler`.
async fn serve_once<F, Fut>(handler: F) -> String
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        handler(ws).await;
    });
    format!("ws://{addr}/ws")
}

async fn drain(ws: &mut WebSocketStream<TcpStream>) {
    while let Some(Ok(message)) = ws.next().await {
        if message.is_close() {
            break;
        }
    }
}

struct AcceptAll;

#[async_trait]
impl WriteApi for AcceptAll {
    async fn write(
        &self,
        _key: &AttributeKey,
        _value: &Value,
    ) -> Result<WriteResponse, WriteError> {
        Ok(WriteResponse { success: true })
    }

    async fn write_group(
        &self,
        _group_id: &str,
        _attribute: &str,
        _value: &Value,
    ) -> Result<GroupWriteResponse, WriteError> {
        Ok(GroupWriteResponse {
            success: true,
            affected_count: 0,
        })
    }
}

#[tokio::test]
async fn text_frames_flow_both_ways() {
    let url = serve_once(|mut ws| async move {
        ws.send(Message::Text(r#"{"type":"ping"}"#.into()))
            .await
            .unwrap();
        // Echo the client's reply back.
        if let Some(Ok(message)) = ws.next().await {
            ws.send(message).await.unwrap();
        }
        drain(&mut ws).await;
    })
    .await;

    let transport = WsTransport::new();
    transport.connect(&url).await.unwrap();
    assert!(transport.is_connected());

    let first = transport.recv().await.unwrap();
    assert_eq!(first, Frame::Text(r#"{"type":"ping"}"#.to_string()));

    transport.send(r#"{"type":"pong"}"#).await.unwrap();
    let echoed = transport.recv().await.unwrap();
    assert_eq!(echoed, Frame::Text(r#"{"type":"pong"}"#.to_string()));

    transport.close(1000).await.unwrap();
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn server_close_code_is_reported() {
    let url = serve_once(|mut ws| async move {
        let frame = CloseFrame {
            code: CloseCode::from(4001),
            reason: "token expired".into(),
        };
        ws.send(Message::Close(Some(frame))).await.unwrap();
        drain(&mut ws).await;
    })
    .await;

    let transport = WsTransport::new();
    transport.connect(&url).await.unwrap();

    let frame = transport.recv().await.unwrap();
    assert_eq!(frame, Frame::Close(Some(4001)));
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = WsTransport::new();
    let result = transport.connect(&format!("ws://{addr}/ws")).await;

    assert!(result.is_err());
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn hub_client_applies_pushed_updates() {
    let url = serve_once(|mut ws| async move {
        let connected = json!({
            "type": "connected",
            "serverInstanceId": "hub-1",
            "pubsubEnabled": true,
            "pubsubSlot": "0",
        });
        let update = json!({
            "type": "characteristic_update",
            "accessoryId": "lamp",
            "characteristicType": "brightness",
            "value": 55,
        });
        ws.send(Message::Text(connected.to_string().into()))
            .await
            .unwrap();
        ws.send(Message::Text(update.to_string().into()))
            .await
            .unwrap();
        drain(&mut ws).await;
    })
    .await;

    let mut config = HubConfig::default();
    config.connection.endpoint = url;
    let cache = Arc::new(MemoryQueryCache::new());
    let client = HubClient::new(
        &config,
        WsTransport::new(),
        AcceptAll,
        cache.clone(),
        Arc::new(Credential::new("integration-token")),
    )
    .unwrap();

    client.connect().unwrap();
    let mut state = client.watch_connection();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(ConnectionState::is_connected),
    )
    .await
    .unwrap()
    .unwrap();

    let key = AttributeKey::new("lamp", "brightness");
    for _ in 0..200 {
        if cache.passes() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(client.read(&key), Some(json!(55)));
    let lamp = cache.entity(&AccessoryId::new("lamp")).unwrap();
    assert_eq!(lamp.attributes.get("brightness"), Some(&json!(55)));

    client.disconnect();
}
