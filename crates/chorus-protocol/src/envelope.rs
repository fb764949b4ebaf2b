//! Inbound envelopes.
//!
//! Every frame a client sends is a JSON object of the form
//! `{ "type": <tag>, "userId": <string>, "data": { ... } }`. Decoding happens
//! in two stages: the outer envelope is parsed first to find the tag, then
//! `data` is decoded into the strongly typed payload for that tag.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::ProtocolError;

/// Opaque user identity supplied by the client on registration.
pub type UserId = String;

/// Recognized inbound tags.
pub mod tags {
    pub const NEW_USER_ADD: &str = "new-user-add";
    pub const SEND_MESSAGE: &str = "send-message";
    pub const NOTIFICATION: &str = "notification";
    pub const POST_CREATED: &str = "post-created";
    pub const POST_REACTION: &str = "post-reaction";
    pub const COMMENT_ADDED: &str = "comment-added";
    pub const COMMENT_REACTION: &str = "comment-reaction";
    pub const STORY_CREATED: &str = "story-created";
    pub const AGORA_SIGNAL: &str = "agora-signal";
    /// Prefix of the shorthand signaling tags (`call-request`, `call-ended`, ...).
    pub const CALL_PREFIX: &str = "call-";
}

/// Outer shape of an inbound frame, before the payload is interpreted.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "userId", default)]
    user_id: String,
    #[serde(default)]
    data: Value,
}

/// A chat message relayed between two users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Recipient; used for routing and not echoed back in `receive-message`.
    #[serde(skip_serializing)]
    pub receiver_id: UserId,
    pub chat_id: String,
    pub sender_id: UserId,
    pub text: String,
    /// Client-supplied timestamp, relayed verbatim.
    pub created_at: Value,
}

/// Call-signaling actions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SignalAction {
    CallRequest,
    CallAccepted,
    CallRejected,
    CallEnded,
    Offer,
    Answer,
    Candidate,
    /// Any other action; relayed without validation of extra fields.
    Other(String),
}

impl SignalAction {
    /// Parse an action name.
    #[must_use]
    pub fn parse(action: &str) -> Self {
        match action {
            "call-request" => Self::CallRequest,
            "call-accepted" => Self::CallAccepted,
            "call-rejected" => Self::CallRejected,
            "call-ended" => Self::CallEnded,
            "offer" | "call-offer" => Self::Offer,
            "answer" | "call-answer" => Self::Answer,
            "candidate" | "ice-candidate" | "call-candidate" => Self::Candidate,
            other => Self::Other(other.to_string()),
        }
    }

    /// Canonical action name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::CallRequest => "call-request",
            Self::CallAccepted => "call-accepted",
            Self::CallRejected => "call-rejected",
            Self::CallEnded => "call-ended",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "ice-candidate",
            Self::Other(action) => action,
        }
    }

    /// Whether this action creates or tears down a tracked call.
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::CallRequest | Self::CallAccepted | Self::CallRejected | Self::CallEnded
        )
    }

    /// Whether this action terminates a call.
    #[must_use]
    pub fn is_teardown(&self) -> bool {
        matches!(self, Self::CallEnded | Self::CallRejected)
    }

    /// Payload field that must accompany this action, if any.
    fn required_field(&self) -> Option<&'static str> {
        match self {
            Self::Offer => Some("offer"),
            Self::Answer => Some("answer"),
            Self::Candidate => Some("candidate"),
            _ => None,
        }
    }
}

/// A call-signaling message relayed to a single peer.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSignal {
    pub action: SignalAction,
    pub target_id: UserId,
    /// Call channel; always present for lifecycle actions.
    pub channel: Option<String>,
    /// The full signaling payload, relayed as sent.
    pub data: Map<String, Value>,
}

/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Register the sender's identity for this connection.
    Register,
    /// Persist and relay a chat message.
    SendMessage(ChatMessage),
    /// Relay a notification to one user.
    Notification {
        receiver_id: UserId,
        data: Map<String, Value>,
    },
    /// Fan out a new post to followers.
    PostCreated {
        followers: Vec<UserId>,
        post: Value,
    },
    /// Relay a post reaction to the post owner.
    PostReaction {
        post_owner: UserId,
        data: Map<String, Value>,
    },
    /// Relay a new comment to the post owner and, for replies, the parent owner.
    CommentAdded {
        post_owner: UserId,
        comment: Value,
        parent_owner: Option<UserId>,
    },
    /// Relay a comment reaction to the comment owner.
    CommentReaction {
        comment_owner: UserId,
        data: Map<String, Value>,
    },
    /// Fan out a new story to followers.
    StoryCreated {
        followers: Vec<UserId>,
        story: Value,
    },
    /// Relay a call-signaling message.
    Signal(CallSignal),
    /// A tag this hub does not know; logged and dropped.
    Unrecognized(String),
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEnvelope {
    /// Identity claimed by the sender.
    pub user_id: UserId,
    /// The typed payload.
    pub event: InboundEvent,
}

impl InboundEnvelope {
    /// Decode an envelope from a parsed JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if the outer envelope is malformed or a recognized
    /// tag is missing a required field.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_value(value)?;
        let data = match raw.data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(invalid(&raw.kind, "data must be an object")),
        };
        let event = decode_event(&raw.kind, data)?;
        Ok(Self {
            user_id: raw.user_id,
            event,
        })
    }

    /// The tag this envelope was decoded from, for logging.
    #[must_use]
    pub fn tag(&self) -> &str {
        match &self.event {
            InboundEvent::Register => tags::NEW_USER_ADD,
            InboundEvent::SendMessage(_) => tags::SEND_MESSAGE,
            InboundEvent::Notification { .. } => tags::NOTIFICATION,
            InboundEvent::PostCreated { .. } => tags::POST_CREATED,
            InboundEvent::PostReaction { .. } => tags::POST_REACTION,
            InboundEvent::CommentAdded { .. } => tags::COMMENT_ADDED,
            InboundEvent::CommentReaction { .. } => tags::COMMENT_REACTION,
            InboundEvent::StoryCreated { .. } => tags::STORY_CREATED,
            InboundEvent::Signal(_) => tags::AGORA_SIGNAL,
            InboundEvent::Unrecognized(tag) => tag,
        }
    }
}

fn decode_event(tag: &str, mut data: Map<String, Value>) -> Result<InboundEvent, ProtocolError> {
    let event = match tag {
        tags::NEW_USER_ADD => InboundEvent::Register,
        tags::SEND_MESSAGE => {
            let message = serde_json::from_value(Value::Object(data))
                .map_err(|e| invalid(tag, e.to_string()))?;
            InboundEvent::SendMessage(message)
        }
        tags::NOTIFICATION => InboundEvent::Notification {
            receiver_id: required_str(tag, &data, "receiverId")?,
            data,
        },
        tags::POST_CREATED => InboundEvent::PostCreated {
            followers: required_list(tag, &data, "followers")?,
            post: required_value(tag, &mut data, "post")?,
        },
        tags::POST_REACTION => InboundEvent::PostReaction {
            post_owner: required_str(tag, &data, "postOwner")?,
            data,
        },
        tags::COMMENT_ADDED => {
            let post_owner = required_str(tag, &data, "postOwner")?;
            let parent_owner = optional_str(tag, &data, "parentOwner")?;
            InboundEvent::CommentAdded {
                post_owner,
                comment: required_value(tag, &mut data, "comment")?,
                parent_owner,
            }
        }
        tags::COMMENT_REACTION => InboundEvent::CommentReaction {
            comment_owner: required_str(tag, &data, "commentOwner")?,
            data,
        },
        tags::STORY_CREATED => InboundEvent::StoryCreated {
            followers: required_list(tag, &data, "followers")?,
            story: required_value(tag, &mut data, "story")?,
        },
        tags::AGORA_SIGNAL => {
            let action = required_str(tag, &data, "action")?;
            InboundEvent::Signal(decode_signal(tag, SignalAction::parse(&action), data)?)
        }
        _ if tag.starts_with(tags::CALL_PREFIX) => {
            // The tag names the action when the payload does not.
            let action = match optional_str(tag, &data, "action")? {
                Some(action) => action,
                None => {
                    data.insert("action".into(), Value::String(tag.to_string()));
                    tag.to_string()
                }
            };
            InboundEvent::Signal(decode_signal(tag, SignalAction::parse(&action), data)?)
        }
        _ => InboundEvent::Unrecognized(tag.to_string()),
    };
    Ok(event)
}

fn decode_signal(
    tag: &str,
    action: SignalAction,
    data: Map<String, Value>,
) -> Result<CallSignal, ProtocolError> {
    let target_id = required_str(tag, &data, "targetId")?;
    let channel = if action.is_lifecycle() {
        Some(required_str(tag, &data, "channel")?)
    } else {
        optional_str(tag, &data, "channel")?
    };
    if let Some(field) = action.required_field() {
        if data.get(field).map_or(true, Value::is_null) {
            return Err(invalid(
                tag,
                format!("{} requires field `{field}`", action.as_str()),
            ));
        }
    }
    Ok(CallSignal {
        action,
        target_id,
        channel,
        data,
    })
}

fn invalid(tag: &str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidPayload {
        tag: tag.to_string(),
        reason: reason.into(),
    }
}

fn required_str(tag: &str, data: &Map<String, Value>, field: &str) -> Result<String, ProtocolError> {
    match data.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(invalid(tag, format!("`{field}` is empty"))),
        Some(_) => Err(invalid(tag, format!("`{field}` must be a string"))),
        None => Err(invalid(tag, format!("missing field `{field}`"))),
    }
}

/// An absent, null, or empty string field reads as `None`.
fn optional_str(
    tag: &str,
    data: &Map<String, Value>,
    field: &str,
) -> Result<Option<String>, ProtocolError> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(invalid(tag, format!("`{field}` must be a string"))),
    }
}

fn required_list(
    tag: &str,
    data: &Map<String, Value>,
    field: &str,
) -> Result<Vec<String>, ProtocolError> {
    let items = match data.get(field) {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(invalid(tag, format!("`{field}` must be a list"))),
        None => return Err(invalid(tag, format!("missing field `{field}`"))),
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            _ => Err(invalid(tag, format!("`{field}` must contain only strings"))),
        })
        .collect()
}

fn required_value(
    tag: &str,
    data: &mut Map<String, Value>,
    field: &str,
) -> Result<Value, ProtocolError> {
    match data.remove(field) {
        Some(Value::Null) | None => Err(invalid(tag, format!("missing field `{field}`"))),
        Some(value) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> Result<InboundEnvelope, ProtocolError> {
        InboundEnvelope::from_value(value)
    }

    #[test]
    fn test_register_without_data() {
        let env = decode(json!({"type": "new-user-add", "userId": "alice"})).unwrap();
        assert_eq!(env.user_id, "alice");
        assert_eq!(env.event, InboundEvent::Register);
    }

    #[test]
    fn test_send_message_fields() {
        let env = decode(json!({
            "type": "send-message",
            "userId": "alice",
            "data": {
                "receiverId": "bob",
                "chatId": "c1",
                "senderId": "alice",
                "text": "hi",
                "createdAt": "2024-01-01T00:00:00Z"
            }
        }))
        .unwrap();

        match env.event {
            InboundEvent::SendMessage(msg) => {
                assert_eq!(msg.receiver_id, "bob");
                assert_eq!(msg.chat_id, "c1");
                assert_eq!(msg.text, "hi");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_send_message_missing_text() {
        let err = decode(json!({
            "type": "send-message",
            "userId": "alice",
            "data": {"receiverId": "bob", "chatId": "c1", "senderId": "alice", "createdAt": 1}
        }))
        .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { ref tag, .. } if tag == "send-message"));
    }

    #[test]
    fn test_followers_must_be_strings() {
        let ok = decode(json!({
            "type": "post-created",
            "data": {"followers": ["bob", "carol"], "post": {"id": 7}}
        }))
        .unwrap();
        assert_eq!(
            ok.event,
            InboundEvent::PostCreated {
                followers: vec!["bob".into(), "carol".into()],
                post: json!({"id": 7}),
            }
        );

        let err = decode(json!({
            "type": "story-created",
            "data": {"followers": ["bob", 3], "story": {}}
        }));
        assert!(err.is_err());
    }

    #[test]
    fn test_comment_parent_owner_optional() {
        let env = decode(json!({
            "type": "comment-added",
            "data": {"postOwner": "bob", "comment": {"text": "nice"}, "parentOwner": ""}
        }))
        .unwrap();
        match env.event {
            InboundEvent::CommentAdded { parent_owner, .. } => assert!(parent_owner.is_none()),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_unknown_tag_is_unrecognized() {
        let env = decode(json!({"type": "typing", "userId": "alice", "data": {}})).unwrap();
        assert_eq!(env.event, InboundEvent::Unrecognized("typing".into()));
        assert_eq!(env.tag(), "typing");
    }

    #[test]
    fn test_signal_shorthand_tag() {
        let env = decode(json!({
            "type": "call-request",
            "userId": "alice",
            "data": {"targetId": "bob", "channel": "room-1", "callType": "video"}
        }))
        .unwrap();
        match env.event {
            InboundEvent::Signal(signal) => {
                assert_eq!(signal.action, SignalAction::CallRequest);
                assert_eq!(signal.channel.as_deref(), Some("room-1"));
                assert_eq!(signal.data["callType"], "video");
                assert_eq!(signal.data["action"], "call-request");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_signal_shorthand_keeps_explicit_action() {
        let env = decode(json!({
            "type": "call-offer",
            "data": {"targetId": "bob", "offer": {"sdp": "v=0"}}
        }))
        .unwrap();
        let InboundEvent::Signal(signal) = env.event else {
            panic!("expected a signal");
        };
        assert_eq!(signal.action, SignalAction::Offer);
        assert_eq!(signal.data["action"], "call-offer");

        let env = decode(json!({
            "type": "call-x",
            "data": {"action": "answer", "targetId": "bob", "answer": {"sdp": "v=0"}}
        }))
        .unwrap();
        let InboundEvent::Signal(signal) = env.event else {
            panic!("expected a signal");
        };
        assert_eq!(signal.action, SignalAction::Answer);
        assert_eq!(signal.data["action"], "answer");
    }

    #[test]
    fn test_signal_lifecycle_requires_channel() {
        let err = decode(json!({
            "type": "agora-signal",
            "data": {"action": "call-ended", "targetId": "bob"}
        }));
        assert!(err.is_err());

        let candidate = decode(json!({
            "type": "agora-signal",
            "data": {"action": "ice-candidate", "targetId": "bob"}
        }));
        assert!(candidate.is_err(), "candidate payload is required");
    }

    #[test]
    fn test_data_must_be_object() {
        assert!(decode(json!({"type": "notification", "data": [1, 2]})).is_err());
    }
}
