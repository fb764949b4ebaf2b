//! Metrics collection and export for Chorus.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use chorus_core::{FanoutReport, Hub, HubStats};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "chorus_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "chorus_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "chorus_connections_rejected_total";
    pub const USERS_REGISTERED: &str = "chorus_users_registered";
    pub const CALLS_ACTIVE: &str = "chorus_calls_active";
    pub const DELIVERIES_TOTAL: &str = "chorus_deliveries_total";
    pub const EVICTIONS_TOTAL: &str = "chorus_evictions_total";
    pub const EVENTS_EMITTED: &str = "chorus_events_emitted_total";
    pub const ERRORS_TOTAL: &str = "chorus_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Connections refused at the connection limit"
    );
    metrics::describe_gauge!(names::USERS_REGISTERED, "Currently registered users");
    metrics::describe_gauge!(names::CALLS_ACTIVE, "Calls currently tracked");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Event deliveries by outcome (delivered, offline, failed)"
    );
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Connections evicted after a failed write"
    );
    metrics::describe_counter!(
        names::EVENTS_EMITTED,
        "Server-originated events injected over HTTP"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a connection refused at the limit.
pub fn record_rejected_connection() {
    counter!(names::CONNECTIONS_REJECTED).increment(1);
}

/// Record an event injected through the HTTP emitter API.
pub fn record_emitted(event: &'static str, report: &FanoutReport) {
    counter!(names::EVENTS_EMITTED, "event" => event).increment(1);
    record_error_count("emit_failed", report.failed);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

fn record_error_count(error_type: &'static str, count: usize) {
    if count > 0 {
        counter!(names::ERRORS_TOTAL, "type" => error_type).increment(count as u64);
    }
}

/// Publish a hub statistics snapshot.
///
/// Delivery and eviction totals are monotonic in the hub, so they are
/// exported as absolute counter values.
pub fn publish_hub_stats(stats: &HubStats) {
    gauge!(names::USERS_REGISTERED).set(stats.registered_users as f64);
    gauge!(names::CALLS_ACTIVE).set(stats.active_calls as f64);
    counter!(names::DELIVERIES_TOTAL, "outcome" => "delivered").absolute(stats.delivered);
    counter!(names::DELIVERIES_TOTAL, "outcome" => "offline").absolute(stats.offline);
    counter!(names::DELIVERIES_TOTAL, "outcome" => "failed").absolute(stats.failed);
    counter!(names::EVICTIONS_TOTAL).absolute(stats.evicted);
}

/// Publish hub statistics every `period` until the task is aborted.
pub fn spawn_stats_publisher(hub: Arc<Hub>, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            publish_hub_stats(&hub.stats());
        }
    })
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::MemoryMessageStore;

    #[test]
    fn test_metrics_guard() {
        let _guard = ConnectionMetricsGuard::new();
    }

    #[test]
    fn test_publish_without_recorder() {
        let hub = Hub::new(Arc::new(MemoryMessageStore::default()));
        publish_hub_stats(&hub.stats());
        record_emitted("notification", &FanoutReport::default());
    }
}
