//! Connection handlers for Chorus server.
//!
//! This module wires the hub to HTTP: the WebSocket endpoint that runs a
//! session per connection, the health and presence reads, and the emitter
//! endpoints a REST layer calls after its own writes.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chorus_core::{run_session, Delivery, FanoutReport, Hub, MemoryMessageStore, SessionError};
use chorus_protocol::UserId;
use chorus_transport::{websocket, ConnectionSink};
use serde::Deserialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// How often hub statistics are exported.
const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Shared server state.
pub struct AppState {
    /// The presence hub.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
    connections: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let store = Arc::new(MemoryMessageStore::new(config.limits.message_history));
        Self {
            hub: Arc::new(Hub::with_config(config.hub_config(), store)),
            config,
            connections: AtomicUsize::new(0),
        }
    }

    /// Reserve a connection slot, if under the limit.
    fn try_acquire(self: &Arc<Self>) -> Option<ConnectionSlot> {
        let limit = self.config.limits.max_connections;
        self.connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .ok()
            .map(|_| ConnectionSlot(Arc::clone(self)))
    }
}

/// A reserved connection slot, released on drop.
struct ConnectionSlot(Arc<AppState>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/presence", get(presence_handler))
        .route("/events/notification", post(notification_handler))
        .route("/events/post-created", post(post_created_handler))
        .route("/events/post-reaction", post(post_reaction_handler))
        .route("/events/comment-added", post(comment_added_handler))
        .route("/events/comment-reaction", post(comment_reaction_handler))
        .route("/events/story-created", post(story_created_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }
    let stats = metrics::spawn_stats_publisher(Arc::clone(&state.hub), STATS_INTERVAL);

    let app = build_router(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Chorus server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await;
    stats.abort();
    served?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.connections.load(Ordering::Acquire),
        "hub": state.hub.stats(),
    }))
}

/// Current presence set.
async fn presence_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "users": state.hub.online_users() }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(slot) = state.try_acquire() else {
        warn!(
            limit = state.config.limits.max_connections,
            "Refusing connection at limit"
        );
        metrics::record_rejected_connection();
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);
    let max_message_size = state.config.limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, remote_addr, state, slot))
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    state: Arc<AppState>,
    _slot: ConnectionSlot,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let max_message_size = state.config.limits.max_message_size;
    let (sink, source) = websocket::split(socket, remote_addr, max_message_size);
    let connection_id = sink.id().clone();
    debug!(connection = %connection_id, remote = ?remote_addr, "WebSocket connected");

    match run_session(Arc::clone(&state.hub), Arc::new(sink), source).await {
        Ok(()) => {}
        Err(SessionError::DuplicateRegistration(user)) => {
            debug!(connection = %connection_id, user = %user, "Registration refused");
            metrics::record_error("duplicate_registration");
        }
        Err(SessionError::Transport(e)) => {
            debug!(connection = %connection_id, error = %e, "Connection failed");
            metrics::record_error("transport");
        }
    }

    debug!(connection = %connection_id, "WebSocket disconnected");
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationRequest {
    user_id: UserId,
    notification: Value,
}

#[derive(Debug, Deserialize)]
struct PostCreatedRequest {
    followers: Vec<UserId>,
    post: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostReactionRequest {
    post_owner: UserId,
    reaction: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentAddedRequest {
    post_owner: UserId,
    #[serde(default)]
    parent_owner: Option<UserId>,
    comment: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentReactionRequest {
    comment_owner: UserId,
    reaction: Value,
}

#[derive(Debug, Deserialize)]
struct StoryCreatedRequest {
    followers: Vec<UserId>,
    story: Value,
}

fn emitted(event: &'static str, report: FanoutReport) -> Json<FanoutReport> {
    metrics::record_emitted(event, &report);
    debug!(
        event = event,
        delivered = report.delivered,
        offline = report.offline,
        failed = report.failed,
        "Emitted event"
    );
    Json(report)
}

fn single(delivery: Delivery) -> FanoutReport {
    std::iter::once(delivery).collect()
}

async fn notification_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NotificationRequest>,
) -> Json<FanoutReport> {
    let delivery = state
        .hub
        .send_notification(&req.user_id, req.notification)
        .await;
    emitted("notification", single(delivery))
}

async fn post_created_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PostCreatedRequest>,
) -> Json<FanoutReport> {
    let report = state.hub.send_post_created(&req.followers, req.post).await;
    emitted("post-created", report)
}

async fn post_reaction_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PostReactionRequest>,
) -> Json<FanoutReport> {
    let delivery = state
        .hub
        .send_post_reaction(&req.post_owner, req.reaction)
        .await;
    emitted("post-reaction", single(delivery))
}

async fn comment_added_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CommentAddedRequest>,
) -> Json<FanoutReport> {
    let report = state
        .hub
        .send_comment_added(&req.post_owner, req.parent_owner.as_deref(), req.comment)
        .await;
    emitted("comment-added", report)
}

async fn comment_reaction_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CommentReactionRequest>,
) -> Json<FanoutReport> {
    let delivery = state
        .hub
        .send_comment_reaction(&req.comment_owner, req.reaction)
        .await;
    emitted("comment-reaction", single(delivery))
}

async fn story_created_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StoryCreatedRequest>,
) -> Json<FanoutReport> {
    let report = state.hub.send_story_created(&req.followers, req.story).await;
    emitted("story-created", report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(max_connections: usize) -> Arc<AppState> {
        let mut config = Config::default();
        config.limits.max_connections = max_connections;
        Arc::new(AppState::new(config))
    }

    #[test]
    fn test_connection_slots_are_bounded() {
        let state = state(2);

        let first = state.try_acquire();
        let second = state.try_acquire();
        assert!(first.is_some() && second.is_some());
        assert!(state.try_acquire().is_none());

        drop(first);
        assert!(state.try_acquire().is_some());
    }

    #[test]
    fn test_comment_request_parent_is_optional() {
        let req: CommentAddedRequest =
            serde_json::from_str(r#"{"postOwner":"bob","comment":{"id":1}}"#).unwrap();
        assert_eq!(req.post_owner, "bob");
        assert!(req.parent_owner.is_none());
    }

    #[tokio::test]
    async fn test_notification_handler_reports_offline() {
        let state = state(10);
        let Json(report) = notification_handler(
            State(state),
            Json(NotificationRequest {
                user_id: "carol".into(),
                notification: serde_json::json!({"text": "hi"}),
            }),
        )
        .await;

        assert_eq!(report.offline, 1);
        assert_eq!(report.delivered, 0);
    }
}
