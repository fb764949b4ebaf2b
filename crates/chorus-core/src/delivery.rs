//! Directed delivery, fan-out and presence broadcast.
//!
//! Nothing here returns an error. A target that is not registered is an
//! expected outcome, and a target whose write fails is evicted from the
//! registry; either way the caller (often a fan-out over many targets) keeps
//! going.

use crate::hub::Hub;
use crate::registry::Handle;
use bytes::Bytes;
use chorus_protocol::{codec, OutboundEvent};
use chorus_transport::TransportError;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use tokio::time;
use tracing::{debug, error, info, trace, warn};

/// Outcome of delivering one event to one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Written to the user's connection.
    Delivered,
    /// The user is not registered.
    Offline,
    /// The write failed; the connection has been evicted.
    Failed,
}

/// Outcome of delivering one event to many users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanoutReport {
    pub delivered: usize,
    pub offline: usize,
    pub failed: usize,
}

impl FanoutReport {
    /// Count one delivery outcome.
    pub fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Delivered => self.delivered += 1,
            Delivery::Offline => self.offline += 1,
            Delivery::Failed => self.failed += 1,
        }
    }

    /// Number of distinct targets attempted.
    #[must_use]
    pub fn targets(&self) -> usize {
        self.delivered + self.offline + self.failed
    }
}

impl FromIterator<Delivery> for FanoutReport {
    fn from_iter<I: IntoIterator<Item = Delivery>>(iter: I) -> Self {
        let mut report = Self::default();
        for delivery in iter {
            report.record(delivery);
        }
        report
    }
}

impl Hub {
    /// Deliver `event` to `user_id`, if registered.
    pub async fn send_to_user(&self, user_id: &str, event: &OutboundEvent) -> Delivery {
        match codec::encode(event) {
            Ok(frame) => self.deliver(user_id, frame).await,
            Err(e) => {
                error!(user = %user_id, error = %e, "Failed to encode event");
                Delivery::Failed
            }
        }
    }

    /// Deliver `event` to every distinct user in `targets`.
    ///
    /// The event is encoded once. Deliveries run concurrently and each one
    /// succeeds or fails on its own.
    pub async fn broadcast_to_set<I, S>(&self, targets: I, event: &OutboundEvent) -> FanoutReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let frame = match codec::encode(event) {
            Ok(frame) => frame,
            Err(e) => {
                error!(event = %event.kind.as_str(), error = %e, "Failed to encode event");
                return FanoutReport::default();
            }
        };

        let mut seen = HashSet::new();
        let targets: Vec<String> = targets
            .into_iter()
            .filter_map(|target| {
                let target = target.as_ref();
                seen.insert(target.to_string()).then(|| target.to_string())
            })
            .collect();

        let report: FanoutReport = join_all(
            targets
                .iter()
                .map(|target| self.deliver(target, frame.clone())),
        )
        .await
        .into_iter()
        .collect();

        debug!(
            event = %event.kind.as_str(),
            delivered = report.delivered,
            offline = report.offline,
            failed = report.failed,
            "Fan-out complete"
        );
        report
    }

    /// Send the full set of registered users to every registered user.
    ///
    /// Connections whose write fails are evicted, and the broadcast repeats
    /// until a round completes without evictions, so every survivor ends up
    /// holding the final set.
    pub async fn broadcast_presence(&self) {
        loop {
            let entries = self.registry.entries();
            let users: Vec<String> = entries.iter().map(|e| e.user_id.clone()).collect();
            let frame = match codec::encode(&OutboundEvent::presence(&users)) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(error = %e, "Failed to encode presence");
                    return;
                }
            };

            trace!(users = ?users, "Broadcasting presence");
            let results = join_all(
                entries
                    .iter()
                    .map(|entry| self.write(&entry.handle, frame.clone())),
            )
            .await;

            let mut evicted = false;
            for (entry, result) in entries.iter().zip(results) {
                match result {
                    Ok(()) => self.counters.record(Delivery::Delivered),
                    Err(e) => {
                        warn!(user = %entry.user_id, error = %e, "Presence write failed");
                        self.counters.record(Delivery::Failed);
                        evicted |= self.evict(&entry.user_id, &entry.handle).await;
                    }
                }
            }

            if !evicted {
                return;
            }
        }
    }

    /// Write a pre-encoded frame to `user_id`.
    pub(crate) async fn deliver(&self, user_id: &str, frame: Bytes) -> Delivery {
        let Some(handle) = self.registry.lookup(user_id) else {
            trace!(user = %user_id, "Target offline");
            self.counters.record(Delivery::Offline);
            return Delivery::Offline;
        };

        match self.write(&handle, frame).await {
            Ok(()) => {
                trace!(user = %user_id, "Delivered");
                self.counters.record(Delivery::Delivered);
                Delivery::Delivered
            }
            Err(e) => {
                warn!(user = %user_id, connection = %handle.id(), error = %e, "Delivery failed");
                self.counters.record(Delivery::Failed);
                if self.evict(user_id, &handle).await {
                    self.broadcast_presence().await;
                }
                Delivery::Failed
            }
        }
    }

    /// Write a frame to one connection, failing if it does not complete
    /// within the configured write timeout.
    pub(crate) async fn write(&self, handle: &Handle, frame: Bytes) -> Result<(), TransportError> {
        let limit = self.config().write_timeout;
        match time::timeout(limit, handle.send_raw(frame)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::SendFailed(format!(
                "write timed out after {}ms",
                limit.as_millis()
            ))),
        }
    }

    /// Encode and write an event to one connection.
    pub(crate) async fn write_event(
        &self,
        handle: &Handle,
        event: &OutboundEvent,
    ) -> Result<(), TransportError> {
        let frame = codec::encode(event)?;
        self.write(handle, frame).await
    }

    /// Close a connection, giving up on the closing handshake after the
    /// write timeout. The handle reads as closed either way.
    pub(crate) async fn close_handle(&self, handle: &Handle) -> Result<(), TransportError> {
        match time::timeout(self.config().write_timeout, handle.close()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Close a dead handle and drop its registry entry.
    ///
    /// Returns whether this call removed the entry. Racing evictions and the
    /// connection's own cleanup all funnel through `remove_connection`, so
    /// exactly one of them sees `true`.
    async fn evict(&self, user_id: &str, handle: &Handle) -> bool {
        if let Err(e) = self.close_handle(handle).await {
            debug!(user = %user_id, error = %e, "Error closing evicted connection");
        }
        let removed = self.registry.remove_connection(user_id, handle.id());
        if removed {
            self.counters.evicted.fetch_add(1, Ordering::Relaxed);
            info!(user = %user_id, connection = %handle.id(), "Evicted stale connection");
        }
        removed
    }
}
