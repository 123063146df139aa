//! Transport abstraction for the homesync push channel.
//!
//! This module provides a pluggable transport layer that abstracts
//! the underlying connection mechanism (WebSocket, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` opens the push channel to a full URL (token included)
//! - `send()` transmits one text frame
//! - `recv()` waits for the next inbound frame
//! - `close()` terminates with a close code
//!
//! `send()` and `recv()` may be called concurrently: the connection manager
//! keeps one task blocked in `recv()` while keepalive pings go out.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.connect("wss://hub.example/ws?token=abc").await?;
//! transport.send(r#"{"type":"ping"}"#).await?;
//! let frame = transport.recv().await?;
//! ```

mod mock;
mod websocket;

pub use mock::MockTransport;
pub use websocket::WsTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection ended without a close frame.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// One inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text frame carrying one JSON message.
    Text(String),
    /// The peer closed the channel, with its close code if it sent one.
    Close(Option<u16>),
}

/// Transport trait for the push channel.
///
/// Implementations handle the underlying connection mechanism
/// (WebSocket, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the channel at `url`.
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Send one text frame.
    async fn send(&self, text: &str) -> Result<(), TransportError>;

    /// Receive the next frame.
    ///
    /// Blocks until a frame is available or the connection ends.
    async fn recv(&self) -> Result<Frame, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the channel with `code`.
    async fn close(&self, code: u16) -> Result<(), TransportError>;
}
