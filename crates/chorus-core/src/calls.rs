//! Active call tracking.
//!
//! Records which user initiated the call on each signaling channel, so that
//! when an initiator disconnects mid-call the other party can be told the
//! call is over. Same locking rules as the connection registry: one mutex,
//! at most one entry per channel, never overwritten.

use chorus_protocol::UserId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// A call in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEntry {
    pub channel: String,
    pub initiator: UserId,
    pub peer: UserId,
}

/// Calls in progress, keyed by channel.
#[derive(Debug, Default)]
pub struct CallRegistry {
    calls: Mutex<HashMap<String, CallEntry>>,
}

impl CallRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CallEntry>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a call request on `channel`.
    ///
    /// Returns `false` if the channel already has a call.
    pub fn record(&self, channel: &str, initiator: &str, peer: &str) -> bool {
        let mut calls = self.lock();
        if let Some(existing) = calls.get(channel) {
            warn!(
                channel = %channel,
                initiator = %existing.initiator,
                "Call already active on channel"
            );
            return false;
        }
        calls.insert(
            channel.to_string(),
            CallEntry {
                channel: channel.to_string(),
                initiator: initiator.to_string(),
                peer: peer.to_string(),
            },
        );
        debug!(channel = %channel, initiator = %initiator, peer = %peer, "Registered call");
        true
    }

    /// Clear the call on `channel`, if `by` is one of its parties.
    pub fn clear(&self, channel: &str, by: &str) -> Option<CallEntry> {
        let mut calls = self.lock();
        match calls.get(channel) {
            Some(call) if call.initiator == by || call.peer == by => {
                debug!(channel = %channel, by = %by, "Removed call");
                calls.remove(channel)
            }
            Some(_) => {
                warn!(channel = %channel, by = %by, "Ignoring teardown from non-participant");
                None
            }
            None => None,
        }
    }

    /// Remove and return every call `user_id` initiated.
    pub fn take_initiated_by(&self, user_id: &str) -> Vec<CallEntry> {
        let mut calls = self.lock();
        let channels: Vec<String> = calls
            .values()
            .filter(|call| call.initiator == user_id)
            .map(|call| call.channel.clone())
            .collect();
        channels
            .iter()
            .filter_map(|channel| calls.remove(channel))
            .collect()
    }

    /// Look up the call on `channel`.
    #[must_use]
    pub fn get(&self, channel: &str) -> Option<CallEntry> {
        self.lock().get(channel).cloned()
    }

    /// Number of calls in progress.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_does_not_overwrite() {
        let calls = CallRegistry::new();

        assert!(calls.record("room-1", "alice", "bob"));
        assert!(!calls.record("room-1", "carol", "bob"));
        assert_eq!(calls.get("room-1").unwrap().initiator, "alice");
    }

    #[test]
    fn test_clear_requires_participant() {
        let calls = CallRegistry::new();
        calls.record("room-1", "alice", "bob");

        assert!(calls.clear("room-1", "mallory").is_none());
        assert_eq!(calls.len(), 1);
        assert!(calls.clear("room-1", "bob").is_some());
        assert!(calls.is_empty());
        assert!(calls.clear("room-1", "bob").is_none());
    }

    #[test]
    fn test_take_initiated_by() {
        let calls = CallRegistry::new();
        calls.record("room-1", "alice", "bob");
        calls.record("room-2", "alice", "carol");
        calls.record("room-3", "bob", "alice");

        let mut taken = calls.take_initiated_by("alice");
        taken.sort_by(|a, b| a.channel.cmp(&b.channel));

        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].peer, "bob");
        assert_eq!(taken[1].peer, "carol");
        assert_eq!(calls.len(), 1);
        assert!(calls.get("room-3").is_some());
    }
}
