//! Mock transport for testing.
//!
//! Allows scripting inbound frames and capturing sent frames for verification.
//! Every successful `connect()` opens a fresh inbound channel, so frames from
//! an old session never leak into a new one.

use super::{Frame, Transport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

type Inbound = Arc<tokio::sync::Mutex<UnboundedReceiver<Frame>>>;

/// Mock transport for testing.
///
/// Allows scripting inbound frames and capturing sent frames for verification.
#[derive(Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Default)]
struct MockTransportInner {
    connected: bool,
    connected_url: Option<String>,
    connect_count: usize,
    connect_times: Vec<tokio::time::Instant>,
    sent: Vec<String>,
    close_codes: Vec<u16>,
    fail_connects: VecDeque<String>,
    fail_next_send: Option<String>,
    backlog: Vec<Frame>,
    inbound_tx: Option<UnboundedSender<Frame>>,
    inbound_rx: Option<Inbound>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `frame` to the current session, or to the next one if none is open.
    pub fn push_frame(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        match &inner.inbound_tx {
            Some(tx) => {
                // Receiver only disappears on close; dropping the frame then is fine.
                let _ = tx.send(frame);
            }
            None => inner.backlog.push(frame),
        }
    }

    /// Deliver a text frame.
    pub fn push_text(&self, text: &str) {
        self.push_frame(Frame::Text(text.to_string()));
    }

    /// Deliver a close frame with `code`.
    pub fn push_close(&self, code: u16) {
        self.push_frame(Frame::Close(Some(code)));
    }

    /// End the current session without a close frame.
    pub fn drop_connection(&self) {
        self.inner.lock().inbound_tx = None;
    }

    /// All text frames that were sent.
    pub fn sent_messages(&self) -> Vec<String> {
        self.inner.lock().sent.clone()
    }

    /// The last text frame that was sent.
    pub fn last_sent(&self) -> Option<String> {
        self.inner.lock().sent.last().cloned()
    }

    /// The URL of the last successful connect.
    pub fn connected_url(&self) -> Option<String> {
        self.inner.lock().connected_url.clone()
    }

    /// Number of connect attempts, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.inner.lock().connect_count
    }

    /// When each connect attempt happened.
    pub fn connect_times(&self) -> Vec<tokio::time::Instant> {
        self.inner.lock().connect_times.clone()
    }

    /// Close codes passed to `close()`.
    pub fn close_codes(&self) -> Vec<u16> {
        self.inner.lock().close_codes.clone()
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.inner.lock().fail_connects.push_back(error.to_string());
    }

    /// Cause the next `count` connect() calls to fail.
    pub fn fail_next_connects(&self, count: usize, error: &str) {
        let mut inner = self.inner.lock();
        for _ in 0..count {
            inner.fail_connects.push_back(error.to_string());
        }
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.inner.lock().fail_next_send = Some(error.to_string());
    }

    /// Clear all state (frames, counters, connection).
    pub fn reset(&self) {
        *self.inner.lock() = MockTransportInner::default();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.connect_count += 1;
        inner.connect_times.push(tokio::time::Instant::now());

        // Check for forced failure
        if let Some(error) = inner.fail_connects.pop_front() {
            return Err(TransportError::ConnectionFailed(error));
        }

        let (tx, rx) = unbounded_channel();
        for frame in inner.backlog.drain(..) {
            let _ = tx.send(frame);
        }
        inner.inbound_tx = Some(tx);
        inner.inbound_rx = Some(Arc::new(tokio::sync::Mutex::new(rx)));
        inner.connected = true;
        inner.connected_url = Some(url.to_string());
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent.push(text.to_string());
        Ok(())
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        let session = {
            let inner = self.inner.lock();
            if !inner.connected {
                return Err(TransportError::NotConnected);
            }
            inner.inbound_rx.clone().ok_or(TransportError::NotConnected)?
        };

        let frame = session.lock().await.recv().await;

        let ended = !matches!(frame, Some(Frame::Text(_)));
        if ended {
            let mut inner = self.inner.lock();
            // Only the current session may flip the flag.
            if inner
                .inbound_rx
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &session))
            {
                inner.connected = false;
                inner.inbound_tx = None;
                inner.inbound_rx = None;
            }
        }

        frame.ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    async fn close(&self, code: u16) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.close_codes.push(code);
        inner.connected = false;
        inner.inbound_tx = None;
        inner.inbound_rx = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_and_exchange_frames() {
        let transport = MockTransport::new();
        transport.connect("wss://hub/ws?token=t").await.unwrap();

        transport.send(r#"{"type":"ping"}"#).await.unwrap();
        transport.push_text(r#"{"type":"pong"}"#);

        assert_eq!(
            transport.recv().await.unwrap(),
            Frame::Text(r#"{"type":"pong"}"#.into())
        );
        assert_eq!(transport.sent_messages(), vec![r#"{"type":"ping"}"#]);
        assert_eq!(
            transport.connected_url().as_deref(),
            Some("wss://hub/ws?token=t")
        );
    }

    #[tokio::test]
    async fn backlog_delivered_on_connect() {
        let transport = MockTransport::new();
        transport.push_text("first");

        transport.connect("wss://hub/ws").await.unwrap();

        assert_eq!(transport.recv().await.unwrap(), Frame::Text("first".into()));
    }

    #[tokio::test]
    async fn forced_connect_failures() {
        let transport = MockTransport::new();
        transport.fail_next_connects(2, "refused");

        assert!(transport.connect("wss://hub/ws").await.is_err());
        assert!(transport.connect("wss://hub/ws").await.is_err());
        assert!(transport.connect("wss://hub/ws").await.is_ok());
        assert_eq!(transport.connect_count(), 3);
    }

    #[tokio::test]
    async fn close_frame_ends_session() {
        let transport = MockTransport::new();
        transport.connect("wss://hub/ws").await.unwrap();
        transport.push_close(4001);

        assert_eq!(transport.recv().await.unwrap(), Frame::Close(Some(4001)));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn dropped_connection_reports_closed() {
        let transport = MockTransport::new();
        transport.connect("wss://hub/ws").await.unwrap();
        transport.drop_connection();

        assert!(matches!(
            transport.recv().await,
            Err(TransportError::ConnectionClosed)
        ));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let transport = MockTransport::new();
        assert!(matches!(
            transport.send("x").await,
            Err(TransportError::NotConnected)
        ));

        transport.connect("wss://hub/ws").await.unwrap();
        transport.close(1000).await.unwrap();

        assert!(transport.send("x").await.is_err());
        assert_eq!(transport.close_codes(), vec![1000]);
    }

    #[tokio::test]
    async fn forced_send_failure_is_one_shot() {
        let transport = MockTransport::new();
        transport.connect("wss://hub/ws").await.unwrap();
        transport.fail_next_send("broken pipe");

        assert!(matches!(
            transport.send("x").await,
            Err(TransportError::SendFailed(e)) if e == "broken pipe"
        ));
        transport.send("y").await.unwrap();
        assert_eq!(transport.sent_messages(), vec!["y"]);
    }

    #[tokio::test]
    async fn reset_forgets_everything() {
        let transport = MockTransport::new();
        transport.connect("wss://hub/ws").await.unwrap();
        transport.send("x").await.unwrap();
        transport.fail_next_connect("refused");

        transport.reset();

        assert!(!transport.is_connected());
        assert!(transport.sent_messages().is_empty());
        assert_eq!(transport.connect_count(), 0);
        assert!(transport.connect("wss://hub/ws").await.is_ok());
    }
}
