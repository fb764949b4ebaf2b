//! Liveness supervision.
//!
//! Each connection gets a probe task that pings on a fixed interval, and its
//! receive loop reads under a deadline that any inbound frame resets. The two
//! share nothing but the connection's write half.

use crate::hub::HubConfig;
use crate::registry::Handle;
use chorus_transport::{ConnectionSource, Inbound, TransportError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, trace};

/// Probe interval and read deadline for one connection.
#[derive(Debug, Clone, Copy)]
pub struct Liveness {
    interval: Duration,
    timeout: Duration,
    write_timeout: Duration,
}

impl Liveness {
    /// Pings that cannot be written within `timeout` count as failed.
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            write_timeout: timeout,
        }
    }

    #[must_use]
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    #[must_use]
    pub fn from_config(config: &HubConfig) -> Self {
        Self::new(config.heartbeat_interval, config.read_timeout)
            .with_write_timeout(config.write_timeout)
    }

    /// Start pinging `handle` until it closes.
    ///
    /// A ping that does not complete within the write timeout closes the
    /// connection. The returned guard stops the probe when dropped.
    #[must_use]
    pub fn spawn_probe(&self, handle: Handle) -> ProbeGuard {
        let period = self.interval;
        let write_timeout = self.write_timeout;
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = handle.closed() => break,
                    _ = ticker.tick() => {
                        trace!(connection = %handle.id(), "Sending ping");
                        match time::timeout(write_timeout, handle.ping()).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                debug!(connection = %handle.id(), error = %e, "Ping failed");
                                break;
                            }
                            Err(_) => {
                                debug!(connection = %handle.id(), "Ping timed out, closing");
                                let _ = time::timeout(write_timeout, handle.close()).await;
                                break;
                            }
                        }
                    }
                }
            }
        });
        ProbeGuard(task)
    }

    /// Read the next frame, failing with [`TransportError::Timeout`] if
    /// nothing arrives before the deadline.
    ///
    /// # Errors
    ///
    /// Returns the source's own error, or `Timeout` on expiry.
    pub async fn next_frame<S>(&self, source: &mut S) -> Result<Option<Inbound>, TransportError>
    where
        S: ConnectionSource + ?Sized,
    {
        match time::timeout(self.timeout, source.recv()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::from_config(&HubConfig::default())
    }
}

/// Aborts the probe task on drop.
#[derive(Debug)]
pub struct ProbeGuard(JoinHandle<()>);

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}
