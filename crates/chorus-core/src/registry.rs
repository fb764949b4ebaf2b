//! Connection registry.
//!
//! Maps each registered user identity to the connection it registered on.
//! All access goes through one mutex, and no method performs I/O while
//! holding it: handles are cloned out and written to after release.

use chorus_protocol::UserId;
use chorus_transport::{ConnectionId, ConnectionSink};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A shared handle to a connection's write half.
pub type Handle = Arc<dyn ConnectionSink>;

/// One registered user.
#[derive(Clone)]
pub struct ConnectionEntry {
    /// The registered identity.
    pub user_id: UserId,
    /// The connection it registered on.
    pub handle: Handle,
}

impl std::fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("user_id", &self.user_id)
            .field("connection", self.handle.id())
            .finish()
    }
}

/// The set of currently registered users.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<UserId, ConnectionEntry>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, ConnectionEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `user_id` on `handle`.
    ///
    /// Returns `false` if the identity is already registered on a live
    /// connection; the existing entry is left untouched. An entry whose
    /// connection has already closed is not live and gets replaced.
    pub fn register(&self, user_id: &str, handle: Handle) -> bool {
        let mut entries = self.lock();
        if let Some(existing) = entries.get(user_id) {
            if existing.handle.is_open() {
                return false;
            }
            debug!(user = %user_id, connection = %existing.handle.id(), "Replacing closed entry");
        }
        entries.insert(
            user_id.to_string(),
            ConnectionEntry {
                user_id: user_id.to_string(),
                handle,
            },
        );
        true
    }

    /// Remove `user_id`, whatever connection it is on.
    ///
    /// Returns the removed handle; removing an absent user is a no-op.
    pub fn remove(&self, user_id: &str) -> Option<Handle> {
        self.lock().remove(user_id).map(|entry| entry.handle)
    }

    /// Remove `user_id` only if it is registered on `connection`.
    ///
    /// Returns whether an entry was removed. Cleanup paths use this so that a
    /// late cleanup for an old connection never removes a newer registration
    /// of the same identity.
    pub fn remove_connection(&self, user_id: &str, connection: &ConnectionId) -> bool {
        let mut entries = self.lock();
        match entries.get(user_id) {
            Some(entry) if entry.handle.id() == connection => {
                entries.remove(user_id);
                true
            }
            _ => false,
        }
    }

    /// Look up the connection `user_id` is registered on.
    #[must_use]
    pub fn lookup(&self, user_id: &str) -> Option<Handle> {
        self.lock().get(user_id).map(|entry| Arc::clone(&entry.handle))
    }

    /// Check whether `user_id` is registered.
    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.lock().contains_key(user_id)
    }

    /// Copy out the registered identities, sorted.
    #[must_use]
    pub fn snapshot(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.lock().keys().cloned().collect();
        users.sort_unstable();
        users
    }

    /// Copy out every entry, sorted by identity.
    ///
    /// Identities and handles come from the same critical section, so a
    /// presence broadcast built from this is consistent.
    #[must_use]
    pub fn entries(&self) -> Vec<ConnectionEntry> {
        let mut entries: Vec<ConnectionEntry> = self.lock().values().cloned().collect();
        entries.sort_unstable_by(|a, b| a.user_id.cmp(&b.user_id));
        entries
    }

    /// Number of registered users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if no user is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_transport::memory;

    fn handle(id: &str) -> Handle {
        let (sink, _source, _peer) = memory::pair(id);
        Arc::new(sink)
    }

    #[test]
    fn test_register_rejects_duplicate() {
        let registry = Registry::new();
        let first = handle("conn-1");

        assert!(registry.register("alice", Arc::clone(&first)));
        assert!(!registry.register("alice", handle("conn-2")));

        assert_eq!(registry.len(), 1);
        let current = registry.lookup("alice").unwrap();
        assert_eq!(current.id().as_str(), "conn-1");
    }

    #[tokio::test]
    async fn test_closed_entry_is_replaced() {
        let registry = Registry::new();
        let first = handle("conn-1");
        registry.register("alice", Arc::clone(&first));

        first.close().await.unwrap();
        assert!(registry.register("alice", handle("conn-2")));
        assert_eq!(registry.lookup("alice").unwrap().id().as_str(), "conn-2");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = Registry::new();
        registry.register("alice", handle("conn-1"));

        assert!(registry.remove("alice").is_some());
        assert!(registry.remove("alice").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_connection_matches_handle() {
        let registry = Registry::new();
        registry.register("alice", handle("conn-1"));

        assert!(!registry.remove_connection("alice", &"conn-2".into()));
        assert!(registry.contains("alice"));
        assert!(registry.remove_connection("alice", &"conn-1".into()));
        assert!(!registry.remove_connection("alice", &"conn-1".into()));
    }

    #[test]
    fn test_snapshot_is_sorted_copy() {
        let registry = Registry::new();
        registry.register("carol", handle("conn-3"));
        registry.register("alice", handle("conn-1"));
        registry.register("bob", handle("conn-2"));

        let snapshot = registry.snapshot();
        registry.remove("bob");

        assert_eq!(snapshot, vec!["alice", "bob", "carol"]);
        assert_eq!(registry.snapshot(), vec!["alice", "carol"]);
        let users: Vec<_> = registry.entries().into_iter().map(|e| e.user_id).collect();
        assert_eq!(users, vec!["alice", "carol"]);
    }

    #[test]
    fn test_concurrent_registration_admits_one() {
        let registry = Arc::new(Registry::new());
        let threads: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.register("alice", handle(&format!("conn-{i}"))))
            })
            .collect();

        let admitted = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(registry.len(), 1);
    }
}
