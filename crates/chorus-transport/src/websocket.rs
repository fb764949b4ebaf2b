//! WebSocket transport implementation.
//!
//! Wraps an upgraded axum [`WebSocket`] and splits it into a shared
//! [`WebSocketSink`] and an owned [`WebSocketSource`].

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::traits::{ConnectionId, ConnectionSink, ConnectionSource, Inbound, TransportError};

/// Split an upgraded WebSocket into its write and read halves.
#[must_use]
pub fn split(
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    max_message_size: usize,
) -> (WebSocketSink, WebSocketSource) {
    let id = ConnectionId::generate();
    let (sink, stream) = socket.split();
    let (closed_tx, _) = watch::channel(false);

    let sink = WebSocketSink {
        id: id.clone(),
        sink: Mutex::new(sink),
        is_open: AtomicBool::new(true),
        closed_tx,
        remote_addr,
    };
    let source = WebSocketSource {
        id,
        stream,
        max_message_size,
    };
    (sink, source)
}

/// The write half of a WebSocket connection.
pub struct WebSocketSink {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    is_open: AtomicBool,
    closed_tx: watch::Sender<bool>,
    remote_addr: Option<SocketAddr>,
}

impl WebSocketSink {
    fn mark_closed(&self) -> bool {
        let was_open = self.is_open.swap(false, Ordering::SeqCst);
        if was_open {
            self.closed_tx.send_replace(true);
        }
        was_open
    }

    async fn write(&self, message: Message) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut sink = self.sink.lock().await;
        // Closed while queued behind another writer.
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        if let Err(e) = sink.send(message).await {
            drop(sink);
            self.mark_closed();
            return Err(TransportError::SendFailed(e.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionSink for WebSocketSink {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn send_raw(&self, data: Bytes) -> Result<(), TransportError> {
        let text = String::from_utf8(data.to_vec())
            .map_err(|e| TransportError::SendFailed(format!("frame is not UTF-8: {e}")))?;
        self.write(Message::Text(text)).await
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.write(Message::Ping(Vec::new())).await
    }

    /// Marks the sink closed before waiting on any in-flight write, so
    /// [`closed`](ConnectionSink::closed) resolves even if that write hangs.
    async fn close(&self) -> Result<(), TransportError> {
        if !self.mark_closed() {
            return Ok(()); // Already closed
        }

        debug!(connection = %self.id, "Closing WebSocket");
        let mut sink = self.sink.lock().await;
        sink.close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }

    async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

/// The read half of a WebSocket connection.
pub struct WebSocketSource {
    id: ConnectionId,
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
}

impl WebSocketSource {
    fn payload(&self, data: Vec<u8>) -> Result<Option<Inbound>, TransportError> {
        if data.len() > self.max_message_size {
            warn!(
                connection = %self.id,
                "Message too large: {} bytes (max: {})",
                data.len(),
                self.max_message_size
            );
            return Err(TransportError::Protocol(
                chorus_protocol::ProtocolError::FrameTooLarge(data.len()),
            ));
        }
        Ok(Some(Inbound::Payload(Bytes::from(data))))
    }
}

#[async_trait]
impl ConnectionSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => self.payload(text.into_bytes()),
            Some(Ok(Message::Binary(data))) => self.payload(data),
            // Pings are answered by the WebSocket layer itself.
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => Ok(Some(Inbound::Heartbeat)),
            Some(Ok(Message::Close(_))) => {
                debug!(connection = %self.id, "Received close frame");
                Ok(None)
            }
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            None => {
                debug!(connection = %self.id, "WebSocket stream ended");
                Ok(None)
            }
        }
    }
}
