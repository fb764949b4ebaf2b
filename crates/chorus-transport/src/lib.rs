//! # chorus-transport
//!
//! Connection handle abstraction for the Chorus hub.
//!
//! This crate provides a uniform interface over the persistent connections
//! the hub talks to:
//!
//! - **WebSocket** - An upgraded axum WebSocket (feature `websocket`, default)
//! - **Memory** - An in-process pair for tests and benches (feature `memory`)
//!
//! ## Connection Halves
//!
//! Every connection is split into a shared [`ConnectionSink`] (writes, pings,
//! close) and an exclusively owned [`ConnectionSource`] (reads), so that the
//! receive loop, the liveness supervisor and deliveries from other
//! connections can all use the same connection concurrently.
//!
//! ```rust,ignore
//! use chorus_transport::{ConnectionSource, Inbound};
//!
//! async fn read_all(mut source: impl ConnectionSource) {
//!     while let Ok(Some(Inbound::Payload(frame))) = source.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(any(test, feature = "memory"))]
pub mod memory;

pub use traits::{ConnectionId, ConnectionSink, ConnectionSource, Inbound, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketSink, WebSocketSource};
