//! Connection handle traits for Chorus.
//!
//! A connection is split into two halves. The write half, [`ConnectionSink`],
//! is shared: the hub's registry, the liveness supervisor and any delivery
//! path may all hold it at once, so every method takes `&self` and writes are
//! serialized internally. The read half, [`ConnectionSource`], is owned by the
//! single task running that connection's receive loop.

use async_trait::async_trait;
use bytes::Bytes;
use chorus_protocol::{codec, OutboundEvent};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No frame arrived before the read deadline.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] chorus_protocol::ProtocolError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Something read from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// An application frame.
    Payload(Bytes),
    /// A transport-level liveness frame (ping or pong) from the peer.
    Heartbeat,
}

/// The shared, writable half of a connection.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Send a pre-encoded frame.
    ///
    /// Concurrent callers never interleave partial frames.
    async fn send_raw(&self, data: Bytes) -> Result<(), TransportError>;

    /// Encode and send an event.
    async fn send(&self, event: &OutboundEvent) -> Result<(), TransportError> {
        let data = codec::encode(event)?;
        self.send_raw(data).await
    }

    /// Send a liveness probe.
    async fn ping(&self) -> Result<(), TransportError>;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Resolve once the connection has been closed by any path.
    async fn closed(&self);

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

/// The exclusively owned, readable half of a connection.
#[async_trait]
pub trait ConnectionSource: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError>;
}
