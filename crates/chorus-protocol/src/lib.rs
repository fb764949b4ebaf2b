//! # chorus-protocol
//!
//! Wire protocol definitions for the Chorus presence and fan-out hub.
//!
//! Clients speak JSON over a persistent WebSocket connection. This crate
//! defines the typed inbound envelopes, the outbound events, and the codec
//! between them and raw frames.
//!
//! ## Envelope Types
//!
//! - `new-user-add` - Register the sender's identity
//! - `send-message` / `notification` / reactions / comments - Directed relays
//! - `post-created` / `story-created` - Fan-out to followers
//! - `agora-signal` / `call-*` - Call-signaling relays
//!
//! ## Example
//!
//! ```rust
//! use chorus_protocol::{codec, InboundEvent, OutboundEvent};
//!
//! let envelope = codec::decode(br#"{"type":"new-user-add","userId":"alice"}"#).unwrap();
//! assert_eq!(envelope.event, InboundEvent::Register);
//!
//! let presence = OutboundEvent::presence(&["alice".to_string()]);
//! let encoded = codec::encode(&presence).unwrap();
//! assert_eq!(&encoded[..], br#"{"type":"get-users","data":["alice"]}"#);
//! ```

pub mod codec;
pub mod envelope;
pub mod event;

pub use codec::{decode, encode, ProtocolError};
pub use envelope::{
    tags, CallSignal, ChatMessage, InboundEnvelope, InboundEvent, SignalAction, UserId,
};
pub use event::{error_codes, EventType, OutboundEvent};
