//! WebSocket transport over tokio-tungstenite.
//!
//! The socket is split so that a reader blocked in `recv()` does not hold up
//! keepalive pings and pongs going out. Protocol-level ping frames are
//! answered by tungstenite itself; the JSON `ping`/`pong` messages of the
//! push protocol travel as ordinary text frames.

use super::{Frame, Transport, TransportError};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Push-channel transport over a WebSocket.
#[derive(Default)]
pub struct WsTransport {
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
    connected: AtomicBool,
}

impl WsTransport {
    /// Create an unconnected transport.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        let (socket, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        debug!(status = %response.status(), "websocket handshake complete");

        let (sink, stream) = socket.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        let mut stream = self.stream.lock().await;
        let stream = stream.as_mut().ok_or(TransportError::NotConnected)?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Frame::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Ok(Frame::Close(frame.map(|f| u16::from(f.code))));
                }
                Some(Ok(other)) => {
                    // Binary, ping and pong frames carry nothing for us.
                    trace!(len = other.len(), "ignoring non-text frame");
                }
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ConnectionClosed);
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self, code: u16) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        let Some(mut sink) = self.sink.lock().await.take() else {
            return Ok(());
        };

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        let result = sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()));

        // The reader may still be parked in recv(); only drop the stream if it is free.
        if let Ok(mut stream) = self.stream.try_lock() {
            stream.take();
        }
        result
    }
}
