//! # chorus-core
//!
//! The presence and fan-out hub at the center of Chorus.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - Which user is registered on which connection
//! - **Delivery** - Directed delivery, fan-out and presence broadcast
//! - **Dispatcher** - Per-connection session state machine
//! - **Liveness** - Ping probe and read deadline per connection
//! - **Calls** - Active call tracking for signaling teardown
//! - **Store** - Message persistence collaborator
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Session    │────▶│    Hub      │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │
//!        ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐
//! │  Liveness   │     │   Calls     │
//! └─────────────┘     └─────────────┘
//! ```
//!
//! Server-originated events enter through the emitter methods on [`Hub`]
//! (`send_notification`, `send_post_created` and friends).

pub mod calls;
pub mod delivery;
pub mod dispatcher;
pub mod hub;
pub mod liveness;
pub mod registry;
pub mod store;

#[cfg(test)]
mod testing;

pub use calls::{CallEntry, CallRegistry};
pub use delivery::{Delivery, FanoutReport};
pub use dispatcher::{run_session, Session, SessionError, SessionState};
pub use hub::{Hub, HubConfig, HubStats};
pub use liveness::{Liveness, ProbeGuard};
pub use registry::{ConnectionEntry, Handle, Registry};
pub use store::{MemoryMessageStore, MessageStore, StoreError};
