//! Per-connection protocol dispatch.
//!
//! A [`Session`] owns the read half of one connection and walks it through
//! `Unregistered -> Registered -> Closed`. Inbound envelopes are handled one
//! at a time in arrival order. Malformed frames are dropped; only transport
//! failures, a missed read deadline or a refused registration end the session.

use crate::hub::Hub;
use crate::liveness::Liveness;
use crate::registry::Handle;
use chorus_protocol::{
    codec, error_codes, ChatMessage, InboundEvent, OutboundEvent, UserId,
};
use chorus_transport::{ConnectionSource, Inbound, TransportError};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Why a session ended abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The connection failed or went silent past its deadline.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The identity was already registered on another live connection.
    #[error("User already registered: {0}")]
    DuplicateRegistration(UserId),
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, no identity yet.
    Unregistered,
    /// Registered under this identity.
    Registered(UserId),
    /// Terminal.
    Closed,
}

/// One connection's receive loop and dispatcher.
pub struct Session<S> {
    hub: Arc<Hub>,
    handle: Handle,
    source: S,
    liveness: Liveness,
    state: SessionState,
}

impl<S: ConnectionSource> Session<S> {
    /// Create a session for a freshly accepted connection.
    pub fn new(hub: Arc<Hub>, handle: Handle, source: S) -> Self {
        let liveness = Liveness::from_config(hub.config());
        Self {
            hub,
            handle,
            source,
            liveness,
            state: SessionState::Unregistered,
        }
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Run until the connection ends, then clean up.
    ///
    /// Cleanup runs on every exit path. A clean close or a close from
    /// elsewhere (eviction after a failed write) returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport failed, the read deadline expired,
    /// or registration was refused.
    pub async fn run(mut self) -> Result<(), SessionError> {
        debug!(
            connection = %self.handle.id(),
            remote = ?self.handle.remote_addr(),
            "Session started"
        );
        let probe = self.liveness.spawn_probe(Arc::clone(&self.handle));

        let result = self.receive_loop().await;
        if let Err(e) = &result {
            debug!(connection = %self.handle.id(), error = %e, "Session ended with error");
        }

        drop(probe);
        self.shutdown().await;
        result
    }

    async fn receive_loop(&mut self) -> Result<(), SessionError> {
        loop {
            let inbound = tokio::select! {
                biased;

                () = self.handle.closed() => {
                    debug!(connection = %self.handle.id(), "Connection closed locally");
                    return Ok(());
                }
                inbound = self.liveness.next_frame(&mut self.source) => inbound?,
            };

            match inbound {
                Some(Inbound::Payload(data)) => self.handle_frame(&data).await?,
                Some(Inbound::Heartbeat) => {
                    trace!(connection = %self.handle.id(), "Heartbeat");
                }
                None => {
                    debug!(connection = %self.handle.id(), "Connection closed by peer");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_frame(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let envelope = match codec::decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(connection = %self.handle.id(), error = %e, "Dropping malformed frame");
                return Ok(());
            }
        };
        trace!(connection = %self.handle.id(), tag = %envelope.tag(), "Received envelope");

        match &self.state {
            SessionState::Unregistered => {
                if matches!(envelope.event, InboundEvent::Register) {
                    return self.register(envelope.user_id).await;
                }
                debug!(
                    connection = %self.handle.id(),
                    tag = %envelope.tag(),
                    "Dropping envelope before registration"
                );
            }
            SessionState::Registered(current) if matches!(envelope.event, InboundEvent::Register) => {
                if *current == envelope.user_id {
                    debug!(user = %current, "Ignoring repeated registration");
                } else {
                    warn!(
                        user = %current,
                        requested = %envelope.user_id,
                        "Ignoring registration under a second identity"
                    );
                }
            }
            SessionState::Registered(current) => {
                let sender = current.clone();
                self.dispatch(&sender, envelope.event).await;
            }
            SessionState::Closed => {}
        }
        Ok(())
    }

    async fn register(&mut self, user_id: UserId) -> Result<(), SessionError> {
        if user_id.is_empty() {
            warn!(connection = %self.handle.id(), "Dropping registration without identity");
            return Ok(());
        }

        if self.hub.registry().register(&user_id, Arc::clone(&self.handle)) {
            info!(user = %user_id, connection = %self.handle.id(), "User registered");
            self.state = SessionState::Registered(user_id);
            self.hub.broadcast_presence().await;
            return Ok(());
        }

        warn!(user = %user_id, connection = %self.handle.id(), "Rejecting duplicate registration");
        let rejection = OutboundEvent::registration_rejected(&user_id, "already registered");
        if let Err(e) = self.hub.write_event(&self.handle, &rejection).await {
            debug!(connection = %self.handle.id(), error = %e, "Failed to send rejection");
        }
        Err(SessionError::DuplicateRegistration(user_id))
    }

    async fn dispatch(&self, sender: &str, event: InboundEvent) {
        let hub = &self.hub;
        match event {
            InboundEvent::SendMessage(message) => self.relay_message(sender, message).await,
            InboundEvent::Notification { receiver_id, data } => {
                hub.send_notification(&receiver_id, Value::Object(data)).await;
            }
            InboundEvent::PostCreated { followers, post } => {
                hub.send_post_created(&followers, post).await;
            }
            InboundEvent::PostReaction { post_owner, data } => {
                hub.send_post_reaction(&post_owner, Value::Object(data))
                    .await;
            }
            InboundEvent::CommentAdded {
                post_owner,
                comment,
                parent_owner,
            } => {
                hub.send_comment_added(&post_owner, parent_owner.as_deref(), comment)
                    .await;
            }
            InboundEvent::CommentReaction {
                comment_owner,
                data,
            } => {
                hub.send_comment_reaction(&comment_owner, Value::Object(data))
                    .await;
            }
            InboundEvent::StoryCreated { followers, story } => {
                hub.send_story_created(&followers, story).await;
            }
            InboundEvent::Signal(signal) => {
                hub.relay_signal(sender, signal).await;
            }
            InboundEvent::Unrecognized(tag) => {
                debug!(user = %sender, tag = %tag, "Ignoring unrecognized event");
            }
            InboundEvent::Register => {}
        }
    }

    /// Persist a chat message, then relay it. If the store refuses it, only
    /// the sender hears about it.
    async fn relay_message(&self, sender: &str, message: ChatMessage) {
        if let Err(e) = self.hub.store().append(&message).await {
            warn!(user = %sender, chat = %message.chat_id, error = %e, "Message not stored");
            let report = OutboundEvent::error(
                error_codes::MESSAGE_NOT_STORED,
                e.to_string(),
                Some(&message.chat_id),
            );
            if let Err(e) = self.hub.write_event(&self.handle, &report).await {
                debug!(user = %sender, error = %e, "Failed to report store error");
            }
            return;
        }

        self.hub
            .send_to_user(&message.receiver_id, &OutboundEvent::receive_message(&message))
            .await;
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.hub.close_handle(&self.handle).await {
            debug!(connection = %self.handle.id(), error = %e, "Error closing connection");
        }

        let SessionState::Registered(user_id) =
            std::mem::replace(&mut self.state, SessionState::Closed)
        else {
            debug!(connection = %self.handle.id(), "Session closed");
            return;
        };

        if self.hub.registry().remove_connection(&user_id, self.handle.id()) {
            info!(user = %user_id, connection = %self.handle.id(), "User disconnected");
            self.hub.broadcast_presence().await;
        }

        let reconnected = self
            .hub
            .registry()
            .lookup(&user_id)
            .is_some_and(|handle| handle.is_open());
        if !reconnected {
            self.hub.end_calls_initiated_by(&user_id).await;
        }
    }
}

/// Run a session for an accepted connection to completion.
///
/// # Errors
///
/// See [`Session::run`].
pub async fn run_session<S: ConnectionSource>(
    hub: Arc<Hub>,
    handle: Handle,
    source: S,
) -> Result<(), SessionError> {
    Session::new(hub, handle, source).run().await
}
