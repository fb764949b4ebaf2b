//! In-memory transport.
//!
//! [`pair`] creates a connected sink/source pair plus a [`MemoryPeer`] that
//! plays the client: it feeds frames into the source, reads what the sink
//! wrote, and can break either direction on demand.

use async_trait::async_trait;
use bytes::Bytes;
use chorus_protocol::{codec, OutboundEvent};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::traits::{ConnectionId, ConnectionSink, ConnectionSource, Inbound, TransportError};

type InboundItem = Result<Inbound, String>;

/// Create an in-memory connection.
#[must_use]
pub fn pair(id: impl Into<ConnectionId>) -> (MemorySink, MemorySource, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);
    let fail_writes = Arc::new(AtomicBool::new(false));
    let stall_writes = Arc::new(AtomicBool::new(false));
    let pings = Arc::new(AtomicUsize::new(0));

    let sink = MemorySink {
        id: id.into(),
        outbound: outbound_tx,
        is_open: AtomicBool::new(true),
        closed_tx,
        fail_writes: Arc::clone(&fail_writes),
        stall_writes: Arc::clone(&stall_writes),
        pings: Arc::clone(&pings),
    };
    let source = MemorySource {
        inbound: inbound_rx,
    };
    let peer = MemoryPeer {
        inbound: Some(inbound_tx),
        outbound: outbound_rx,
        closed: closed_rx,
        fail_writes,
        stall_writes,
        pings,
    };
    (sink, source, peer)
}

/// Write half of an in-memory connection.
pub struct MemorySink {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Bytes>,
    is_open: AtomicBool,
    closed_tx: watch::Sender<bool>,
    fail_writes: Arc<AtomicBool>,
    stall_writes: Arc<AtomicBool>,
    pings: Arc<AtomicUsize>,
}

impl MemorySink {
    /// A stalled peer never drains its socket, so writes never finish.
    async fn wait_writable(&self) {
        if self.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    fn mark_closed(&self) -> bool {
        let was_open = self.is_open.swap(false, Ordering::SeqCst);
        if was_open {
            self.closed_tx.send_replace(true);
        }
        was_open
    }

    fn check_writable(&self) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            self.mark_closed();
            return Err(TransportError::SendFailed("broken pipe".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionSink for MemorySink {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn send_raw(&self, data: Bytes) -> Result<(), TransportError> {
        self.check_writable()?;
        self.wait_writable().await;
        if self.outbound.send(data).is_err() {
            self.mark_closed();
            return Err(TransportError::SendFailed("peer dropped".into()));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.check_writable()?;
        self.wait_writable().await;
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.mark_closed();
        Ok(())
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
        Some("memory".to_string())
    }
}

/// Read half of an in-memory connection.
pub struct MemorySource {
    inbound: mpsc::UnboundedReceiver<InboundItem>,
}

#[async_trait]
impl ConnectionSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        match self.inbound.recv().await {
            Some(Ok(inbound)) => Ok(Some(inbound)),
            Some(Err(reason)) => Err(TransportError::ReceiveFailed(reason)),
            None => Ok(None),
        }
    }
}

/// The client end of an in-memory connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<InboundItem>>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    closed: watch::Receiver<bool>,
    fail_writes: Arc<AtomicBool>,
    stall_writes: Arc<AtomicBool>,
    pings: Arc<AtomicUsize>,
}

impl MemoryPeer {
    fn push(&self, item: InboundItem) {
        if let Some(tx) = &self.inbound {
            // The source may already be gone; the peer does not care.
            let _ = tx.send(item);
        }
    }

    /// Send a text frame to the server.
    pub fn send_text(&self, text: impl Into<String>) {
        self.push(Ok(Inbound::Payload(Bytes::from(text.into()))));
    }

    /// Send a liveness reply.
    pub fn heartbeat(&self) {
        self.push(Ok(Inbound::Heartbeat));
    }

    /// Make the server's next read fail.
    pub fn fail_read(&self, reason: impl Into<String>) {
        self.push(Err(reason.into()));
    }

    /// Hang up; the server's read returns a clean close.
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }

    /// Make every subsequent server write fail, as with a dead socket.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Stop reading, so every subsequent server write hangs.
    pub fn stall_writes(&self) {
        self.stall_writes.store(true, Ordering::SeqCst);
    }

    /// Wait for the next event written by the server.
    ///
    /// Returns `None` once the server side has been dropped.
    pub async fn recv(&mut self) -> Option<OutboundEvent> {
        let frame = self.outbound.recv().await?;
        codec::decode_event(&frame).ok()
    }

    /// Take the next already-written event, if any.
    pub fn try_recv(&mut self) -> Option<OutboundEvent> {
        let frame = self.outbound.try_recv().ok()?;
        codec::decode_event(&frame).ok()
    }

    /// Take every already-written event.
    pub fn drain(&mut self) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }

    /// Number of liveness probes the server has sent.
    #[must_use]
    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Whether the server has closed this connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}
