//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, upstream status reporting, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (upstream open, or nothing requested)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::ConnectionState;
use crate::application::services::{BrokerHandle, BrokerSnapshot};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::mobula::FeedStatus;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Broker version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream connection status.
    pub upstream: UpstreamInfo,
    /// Attached consumer sessions.
    pub sessions: usize,
    /// Topics requested upstream.
    pub topics: usize,
    /// Topics followed by more than one consumer.
    pub shared_topics: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Upstream open, or nothing to stream.
    Healthy,
    /// Topics requested but the upstream is not open.
    Degraded,
    /// Broker task unavailable.
    Unhealthy,
}

/// Upstream connection status.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamInfo {
    /// Connection state.
    pub state: &'static str,
    /// Whether the socket is open.
    pub connected: bool,
    /// Events received since start.
    pub messages_received: u64,
    /// Reconnects scheduled since the last open.
    pub reconnect_attempts: u32,
    /// When the connection last opened.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Most recent failure.
    pub last_error: Option<String>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed: Arc<FeedStatus>,
    broker: BrokerHandle,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, feed: Arc<FeedStatus>, broker: BrokerHandle) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed,
            broker,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Build the router without binding.
    #[must_use]
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state).await;
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state).await;

    if response.status == HealthStatus::Healthy {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let snapshot = state.broker.snapshot().await.ok();
    let upstream = upstream_info(&state.feed);
    let status = determine_health_status(snapshot.as_ref(), &upstream);
    let snapshot = snapshot.unwrap_or_default();

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        upstream,
        sessions: snapshot.sessions,
        topics: snapshot.topics.len(),
        shared_topics: snapshot.registry.shared_topics,
    }
}

fn upstream_info(feed: &FeedStatus) -> UpstreamInfo {
    let state = feed.state();
    UpstreamInfo {
        state: state.as_str(),
        connected: state == ConnectionState::Open,
        messages_received: feed.messages_received(),
        reconnect_attempts: feed.reconnect_attempts(),
        last_connected_at: feed.last_connected_at(),
        last_error: feed.last_error(),
    }
}

fn determine_health_status(
    snapshot: Option<&BrokerSnapshot>,
    upstream: &UpstreamInfo,
) -> HealthStatus {
    match snapshot {
        None => HealthStatus::Unhealthy,
        Some(snapshot) if upstream.connected || snapshot.topics.is_empty() => {
            HealthStatus::Healthy
        }
        Some(_) => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::domain::subscription::Topic;

    fn upstream(connected: bool) -> UpstreamInfo {
        UpstreamInfo {
            state: if connected { "open" } else { "disconnected" },
            connected,
            messages_received: 0,
            reconnect_attempts: 0,
            last_connected_at: None,
            last_error: None,
        }
    }

    fn snapshot_with_topics(topics: &[&str]) -> BrokerSnapshot {
        BrokerSnapshot {
            topics: topics.iter().map(|t| Topic::new(*t)).collect::<BTreeSet<_>>(),
            ..BrokerSnapshot::default()
        }
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn idle_broker_is_healthy() {
        let snapshot = snapshot_with_topics(&[]);
        assert_eq!(
            determine_health_status(Some(&snapshot), &upstream(false)),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn requested_topics_without_connection_degrade() {
        let snapshot = snapshot_with_topics(&["A"]);
        assert_eq!(
            determine_health_status(Some(&snapshot), &upstream(false)),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(Some(&snapshot), &upstream(true)),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn stopped_broker_is_unhealthy() {
        assert_eq!(
            determine_health_status(None, &upstream(true)),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn upstream_info_reads_feed_status() {
        let feed = FeedStatus::new();
        feed.set_state(ConnectionState::Open);
        feed.record_message();

        let info = upstream_info(&feed);

        assert!(info.connected);
        assert_eq!(info.messages_received, 1);
        assert_eq!(
            serde_json::to_value(&info).unwrap()["state"],
            serde_json::json!("open")
        );
    }
}
