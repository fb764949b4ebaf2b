//! Outbound events.
//!
//! Everything the hub writes to a connection is an `OutboundEvent`:
//! `{ "type": <tag>, "data": <payload> }`, with an optional top-level
//! `"userId"` naming the originating user on relayed signals.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::envelope::ChatMessage;

/// Outbound event tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    /// Full set of registered users.
    GetUsers,
    ReceiveMessage,
    Notification,
    NewPost,
    PostReactionUpdate,
    NewComment,
    NewReply,
    CommentReactionUpdate,
    NewStory,
    AgoraSignal,
    /// Sent before closing a connection whose registration was refused.
    RegistrationRejected,
    /// A request from this connection could not be completed.
    Error,
}

impl EventType {
    /// Wire name of the tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetUsers => "get-users",
            Self::ReceiveMessage => "receive-message",
            Self::Notification => "notification",
            Self::NewPost => "new-post",
            Self::PostReactionUpdate => "post-reaction-update",
            Self::NewComment => "new-comment",
            Self::NewReply => "new-reply",
            Self::CommentReactionUpdate => "comment-reaction-update",
            Self::NewStory => "new-story",
            Self::AgoraSignal => "agora-signal",
            Self::RegistrationRejected => "registration-rejected",
            Self::Error => "error",
        }
    }
}

/// Error codes carried by [`EventType::Error`] events.
pub mod error_codes {
    /// The message could not be persisted and was not relayed.
    pub const MESSAGE_NOT_STORED: u16 = 2001;
}

/// An event delivered to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub data: Value,
}

impl OutboundEvent {
    /// Create an event with the given tag and payload.
    #[must_use]
    pub fn new(kind: EventType, data: Value) -> Self {
        Self {
            kind,
            user_id: None,
            data,
        }
    }

    /// Attach the originating user.
    #[must_use]
    pub fn from_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Presence: the full current set of registered users.
    #[must_use]
    pub fn presence(users: &[String]) -> Self {
        Self::new(EventType::GetUsers, json!(users))
    }

    /// A relayed chat message.
    #[must_use]
    pub fn receive_message(message: &ChatMessage) -> Self {
        Self::new(
            EventType::ReceiveMessage,
            json!({
                "chatId": message.chat_id,
                "senderId": message.sender_id,
                "text": message.text,
                "createdAt": message.created_at,
            }),
        )
    }

    #[must_use]
    pub fn notification(data: Value) -> Self {
        Self::new(EventType::Notification, data)
    }

    #[must_use]
    pub fn new_post(post: Value) -> Self {
        Self::new(EventType::NewPost, post)
    }

    #[must_use]
    pub fn post_reaction(data: Value) -> Self {
        Self::new(EventType::PostReactionUpdate, data)
    }

    #[must_use]
    pub fn new_comment(comment: Value) -> Self {
        Self::new(EventType::NewComment, comment)
    }

    #[must_use]
    pub fn new_reply(comment: Value) -> Self {
        Self::new(EventType::NewReply, comment)
    }

    #[must_use]
    pub fn comment_reaction(data: Value) -> Self {
        Self::new(EventType::CommentReactionUpdate, data)
    }

    #[must_use]
    pub fn new_story(story: Value) -> Self {
        Self::new(EventType::NewStory, story)
    }

    /// A signaling payload relayed from `sender`.
    #[must_use]
    pub fn signal(sender: &str, data: Map<String, Value>) -> Self {
        Self::new(EventType::AgoraSignal, Value::Object(data)).from_user(sender)
    }

    /// Synthetic teardown sent to `peer` when the call's initiator disconnects.
    #[must_use]
    pub fn call_ended(initiator: &str, peer: &str, channel: &str) -> Self {
        Self::new(
            EventType::AgoraSignal,
            json!({
                "action": "call-ended",
                "channel": channel,
                "targetId": peer,
                "reason": "disconnected",
            }),
        )
        .from_user(initiator)
    }

    /// Registration refused for `user_id`.
    #[must_use]
    pub fn registration_rejected(user_id: &str, reason: &str) -> Self {
        Self::new(
            EventType::RegistrationRejected,
            json!({ "userId": user_id, "reason": reason }),
        )
    }

    /// An error reported to the sender only.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>, chat_id: Option<&str>) -> Self {
        let mut data = Map::new();
        data.insert("code".into(), json!(code));
        data.insert("message".into(), Value::String(message.into()));
        if let Some(chat_id) = chat_id {
            data.insert("chatId".into(), Value::String(chat_id.to_string()));
        }
        Self::new(EventType::Error, Value::Object(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_shape() {
        let event = OutboundEvent::presence(&["alice".into(), "bob".into()]);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "get-users", "data": ["alice", "bob"]})
        );
    }

    #[test]
    fn test_receive_message_drops_receiver() {
        let msg = ChatMessage {
            receiver_id: "bob".into(),
            chat_id: "c1".into(),
            sender_id: "alice".into(),
            text: "hi".into(),
            created_at: json!(1700000000),
        };
        let value = serde_json::to_value(OutboundEvent::receive_message(&msg)).unwrap();
        assert_eq!(value["type"], "receive-message");
        assert_eq!(value["data"]["chatId"], "c1");
        assert_eq!(value["data"]["createdAt"], 1700000000);
        assert!(value["data"].get("receiverId").is_none());
    }

    #[test]
    fn test_signal_carries_sender() {
        let mut data = Map::new();
        data.insert("action".into(), json!("offer"));
        let value = serde_json::to_value(OutboundEvent::signal("alice", data)).unwrap();
        assert_eq!(value["type"], "agora-signal");
        assert_eq!(value["userId"], "alice");
    }

    #[test]
    fn test_event_type_names_match_serde() {
        for kind in [
            EventType::GetUsers,
            EventType::PostReactionUpdate,
            EventType::CommentReactionUpdate,
            EventType::AgoraSignal,
            EventType::RegistrationRejected,
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
        }
    }
}
