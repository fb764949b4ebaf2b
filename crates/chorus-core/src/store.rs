//! Message persistence collaborator.
//!
//! The hub never queries storage. It hands each relayed chat message to a
//! [`MessageStore`] before relaying it, and a failed append cancels the relay.

use async_trait::async_trait;
use chorus_protocol::ChatMessage;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the message.
    #[error("Message rejected: {0}")]
    Rejected(String),
}

/// Appends relayed chat messages to durable storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist `message`.
    async fn append(&self, message: &ChatMessage) -> Result<(), StoreError>;
}

/// Bounded in-process store that keeps the newest messages.
#[derive(Debug)]
pub struct MemoryMessageStore {
    messages: Mutex<VecDeque<ChatMessage>>,
    capacity: usize,
}

impl MemoryMessageStore {
    /// Create a store holding at most `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ChatMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored messages for `chat_id`, oldest first.
    #[must_use]
    pub fn chat_history(&self, chat_id: &str) -> Vec<ChatMessage> {
        self.lock()
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect()
    }

    /// Number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, message: &ChatMessage) -> Result<(), StoreError> {
        if message.text.trim().is_empty() {
            return Err(StoreError::Rejected("text is empty".into()));
        }
        if self.capacity == 0 {
            return Ok(());
        }

        let mut messages = self.lock();
        if messages.len() == self.capacity {
            messages.pop_front();
        }
        messages.push_back(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(chat_id: &str, text: &str) -> ChatMessage {
        ChatMessage {
            receiver_id: "bob".into(),
            chat_id: chat_id.into(),
            sender_id: "alice".into(),
            text: text.into(),
            created_at: json!(0),
        }
    }

    #[tokio::test]
    async fn test_keeps_newest() {
        let store = MemoryMessageStore::new(2);
        for text in ["one", "two", "three"] {
            store.append(&message("c1", text)).await.unwrap();
        }

        let history: Vec<_> = store.chat_history("c1").into_iter().map(|m| m.text).collect();
        assert_eq!(history, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn test_rejects_blank_text() {
        let store = MemoryMessageStore::default();
        assert!(matches!(
            store.append(&message("c1", "   ")).await,
            Err(StoreError::Rejected(_))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_history_filters_by_chat() {
        let store = MemoryMessageStore::default();
        store.append(&message("c1", "hi")).await.unwrap();
        store.append(&message("c2", "yo")).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.chat_history("c2").len(), 1);
    }
}
