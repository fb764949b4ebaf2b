//! Shared fixtures for the Chorus benchmarks.

use chorus_core::{Hub, MemoryMessageStore};
use chorus_transport::memory::{self, MemoryPeer};
use chorus_transport::ConnectionId;
use std::sync::Arc;

/// A hub whose message store keeps nothing.
#[must_use]
pub fn hub() -> Arc<Hub> {
    Arc::new(Hub::new(Arc::new(MemoryMessageStore::new(0))))
}

/// Identities `user-0` .. `user-{n-1}`.
#[must_use]
pub fn user_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("user-{i}")).collect()
}

/// Register every identity in `users` on an in-memory connection.
///
/// The returned peers must be kept alive; dropping one makes its writes fail.
#[must_use]
pub fn register_all(hub: &Hub, users: &[String]) -> Vec<MemoryPeer> {
    users
        .iter()
        .map(|user| {
            let (sink, _source, peer) = memory::pair(ConnectionId::generate());
            hub.registry().register(user, Arc::new(sink));
            peer
        })
        .collect()
}

/// Discard everything the hub has written to `peers`.
pub fn drain(peers: &mut [MemoryPeer]) -> usize {
    peers.iter_mut().map(|peer| peer.drain().len()).sum()
}
