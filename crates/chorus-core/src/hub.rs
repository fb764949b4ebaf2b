//! The presence hub.
//!
//! [`Hub`] owns the connection registry, the active-call registry and the
//! message store. It is built once at startup and shared as `Arc<Hub>` with
//! every connection task and with the server-side emitters.

use crate::calls::{CallEntry, CallRegistry};
use crate::delivery::{Delivery, FanoutReport};
use crate::registry::Registry;
use crate::store::MessageStore;
use chorus_protocol::{CallSignal, OutboundEvent, SignalAction, UserId};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Interval between liveness probes on each connection.
    pub heartbeat_interval: Duration,
    /// How long a connection may stay silent before it is considered dead.
    pub read_timeout: Duration,
    /// How long a single write may take before the connection is treated as
    /// stale.
    pub write_timeout: Duration,
    /// Whether to track calls and end them when their initiator disconnects.
    pub track_calls: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            track_calls: true,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) delivered: AtomicU64,
    pub(crate) offline: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) evicted: AtomicU64,
}

impl Counters {
    pub(crate) fn record(&self, delivery: Delivery) {
        let counter = match delivery {
            Delivery::Delivered => &self.delivered,
            Delivery::Offline => &self.offline,
            Delivery::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    /// Number of registered users.
    pub registered_users: usize,
    /// Number of tracked calls.
    pub active_calls: usize,
    /// Deliveries written to a connection.
    pub delivered: u64,
    /// Deliveries skipped because the target was not registered.
    pub offline: u64,
    /// Deliveries whose write failed.
    pub failed: u64,
    /// Connections removed after a failed write.
    pub evicted: u64,
}

/// The central presence and fan-out hub.
pub struct Hub {
    pub(crate) registry: Registry,
    calls: Option<CallRegistry>,
    store: Arc<dyn MessageStore>,
    config: HubConfig,
    pub(crate) counters: Counters,
}

impl Hub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self::with_config(HubConfig::default(), store)
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig, store: Arc<dyn MessageStore>) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            registry: Registry::new(),
            calls: config.track_calls.then(CallRegistry::new),
            store,
            config,
            counters: Counters::default(),
        }
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The active-call registry, if call tracking is enabled.
    #[must_use]
    pub fn calls(&self) -> Option<&CallRegistry> {
        self.calls.as_ref()
    }

    /// The message store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// The hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Currently registered users, sorted.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        self.registry.snapshot()
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            registered_users: self.registry.len(),
            active_calls: self.calls.as_ref().map_or(0, CallRegistry::len),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            offline: self.counters.offline.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
        }
    }

    /// Relay a signaling message from `sender` to its target and update call
    /// tracking.
    pub async fn relay_signal(&self, sender: &str, signal: CallSignal) -> Delivery {
        let CallSignal {
            action,
            target_id,
            channel,
            data,
        } = signal;

        debug!(
            action = %action.as_str(),
            from = %sender,
            to = %target_id,
            "Forwarding signal"
        );
        let delivery = self
            .send_to_user(&target_id, &OutboundEvent::signal(sender, data))
            .await;

        if let (Some(calls), Some(channel)) = (&self.calls, channel) {
            if action == SignalAction::CallRequest {
                calls.record(&channel, sender, &target_id);
            } else if action.is_teardown() {
                calls.clear(&channel, sender);
            }
        }

        delivery
    }

    /// End every call `user_id` initiated, telling each peer the call ended.
    ///
    /// This is the disconnect hook for call tracking; it does nothing when
    /// tracking is disabled.
    pub async fn end_calls_initiated_by(&self, user_id: &str) -> Vec<CallEntry> {
        let Some(calls) = &self.calls else {
            return Vec::new();
        };

        let ended = calls.take_initiated_by(user_id);
        for call in &ended {
            info!(channel = %call.channel, initiator = %user_id, peer = %call.peer, "Ending call");
            self.send_to_user(
                &call.peer,
                &OutboundEvent::call_ended(user_id, &call.peer, &call.channel),
            )
            .await;
        }
        ended
    }

    /// Push a notification to one user.
    pub async fn send_notification(&self, user_id: &str, notification: Value) -> Delivery {
        self.send_to_user(user_id, &OutboundEvent::notification(notification))
            .await
    }

    /// Push a new post to every follower.
    pub async fn send_post_created(&self, followers: &[UserId], post: Value) -> FanoutReport {
        debug!(followers = followers.len(), "Broadcasting new post");
        self.broadcast_to_set(followers, &OutboundEvent::new_post(post))
            .await
    }

    /// Push a post reaction to the post's owner.
    pub async fn send_post_reaction(&self, post_owner: &str, reaction: Value) -> Delivery {
        self.send_to_user(post_owner, &OutboundEvent::post_reaction(reaction))
            .await
    }

    /// Push a new comment to the post's owner and, for a reply, to the owner
    /// of the parent comment when that is someone else.
    pub async fn send_comment_added(
        &self,
        post_owner: &str,
        parent_owner: Option<&str>,
        comment: Value,
    ) -> FanoutReport {
        let mut report = FanoutReport::default();
        let reply_to = parent_owner.filter(|owner| !owner.is_empty() && *owner != post_owner);

        if let Some(parent_owner) = reply_to {
            report.record(
                self.send_to_user(parent_owner, &OutboundEvent::new_reply(comment.clone()))
                    .await,
            );
        }
        report.record(
            self.send_to_user(post_owner, &OutboundEvent::new_comment(comment))
                .await,
        );
        report
    }

    /// Push a comment reaction to the comment's owner.
    pub async fn send_comment_reaction(&self, comment_owner: &str, reaction: Value) -> Delivery {
        self.send_to_user(comment_owner, &OutboundEvent::comment_reaction(reaction))
            .await
    }

    /// Push a new story to every follower.
    pub async fn send_story_created(&self, followers: &[UserId], story: Value) -> FanoutReport {
        debug!(followers = followers.len(), "Broadcasting new story");
        self.broadcast_to_set(followers, &OutboundEvent::new_story(story))
            .await
    }
}
