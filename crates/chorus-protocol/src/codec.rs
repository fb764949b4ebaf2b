//! Codec for encoding and decoding Chorus frames.
//!
//! Frames are JSON text, one envelope or event per WebSocket message.

use bytes::Bytes;
use thiserror::Error;

use crate::envelope::InboundEnvelope;
use crate::event::OutboundEvent;

/// Maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Frame is not valid JSON or not an envelope.
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// A recognized tag is missing a required field or has a mistyped one.
    #[error("Invalid `{tag}` payload: {reason}")]
    InvalidPayload {
        /// The envelope's tag.
        tag: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Encode an event to bytes.
///
/// The result is shared across every target of a fan-out, so an event is
/// serialized once no matter how many connections receive it.
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode(event: &OutboundEvent) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(event)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Decode an inbound envelope from bytes.
///
/// # Errors
///
/// Returns an error if the frame is too large, is not JSON, or carries an
/// invalid payload for its tag.
pub fn decode(data: &[u8]) -> Result<InboundEnvelope, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    let value = serde_json::from_slice(data)?;
    InboundEnvelope::from_value(value)
}

/// Decode an outbound event, as a client would.
///
/// # Errors
///
/// Returns an error if the data is not a valid event.
pub fn decode_event(data: &[u8]) -> Result<OutboundEvent, ProtocolError> {
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::InboundEvent;
    use crate::event::EventType;
    use serde_json::json;

    #[test]
    fn test_decode_register() {
        let envelope = decode(br#"{"type":"new-user-add","userId":"alice"}"#).unwrap();
        assert_eq!(envelope.user_id, "alice");
        assert_eq!(envelope.event, InboundEvent::Register);
    }

    #[test]
    fn test_decode_not_json() {
        match decode(b"hello") {
            Err(ProtocolError::Json(_)) => {}
            other => panic!("Expected Json error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_missing_type() {
        assert!(matches!(
            decode(br#"{"userId":"alice"}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let big = vec![b' '; MAX_FRAME_SIZE + 1];
        match decode(&big) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }

        let event = OutboundEvent::new_post(json!("x".repeat(MAX_FRAME_SIZE)));
        match encode(&event) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_is_client_readable() {
        let encoded = encode(&OutboundEvent::new_story(json!({"id": 3}))).unwrap();
        let event = decode_event(&encoded).unwrap();
        assert_eq!(event.kind, EventType::NewStory);
        assert_eq!(event.data, json!({"id": 3}));
        assert!(event.user_id.is_none());
    }
}
