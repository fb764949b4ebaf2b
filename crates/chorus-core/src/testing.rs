//! Test fixtures over the in-memory transport.

use crate::dispatcher::{run_session, SessionError};
use crate::hub::Hub;
use crate::store::MemoryMessageStore;
use chorus_transport::memory::{self, MemoryPeer};
use chorus_transport::ConnectionId;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub(crate) fn hub() -> Hub {
    Hub::new(Arc::new(MemoryMessageStore::default()))
}

/// Register `user_id` directly, bypassing the dispatcher.
pub(crate) fn connect(hub: &Hub, user_id: &str) -> MemoryPeer {
    let (sink, _source, peer) = memory::pair(ConnectionId::generate());
    assert!(hub.registry().register(user_id, Arc::new(sink)));
    peer
}

/// Run a full session for a fresh connection.
pub(crate) fn spawn_session(hub: &Arc<Hub>) -> (MemoryPeer, JoinHandle<Result<(), SessionError>>) {
    let (sink, source, peer) = memory::pair(ConnectionId::generate());
    let task = tokio::spawn(run_session(Arc::clone(hub), Arc::new(sink), source));
    (peer, task)
}

pub(crate) fn register_frame(user_id: &str) -> String {
    format!(r#"{{"type":"new-user-add","userId":"{user_id}"}}"#)
}
