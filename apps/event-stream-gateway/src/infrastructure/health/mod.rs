//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, stream table status, and Prometheus
//! metrics. Used by container orchestrators, load balancers, and monitoring
//! systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness check (simple OK)
//! - `GET /readyz` - Kubernetes readiness check (streams published, bus open)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::StreamRegistry;
use crate::domain::admission::ConnectionAdmission;
use crate::infrastructure::bus::SharedBus;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Gateway version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Published stream table.
    pub streams: StreamsStatus,
    /// Connected sessions.
    pub sessions: SessionStatus,
    /// Whether the message bus accepts new sessions.
    pub bus_open: bool,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Serving, but the stream table has not been refreshed recently.
    Degraded,
    /// Cannot serve streams.
    Unhealthy,
}

/// Stream table status.
#[derive(Debug, Clone, Serialize)]
pub struct StreamsStatus {
    /// Number of published streams, aliases included.
    pub count: usize,
    /// Publication counter of the current table.
    pub generation: u64,
    /// When the current table was published.
    pub published_at: DateTime<Utc>,
}

/// Session counts.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// Admitted connections across all client IPs.
    pub active: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    registry: Arc<StreamRegistry>,
    admission: Arc<ConnectionAdmission>,
    bus: SharedBus,
    stale_after: Option<Duration>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        registry: Arc<StreamRegistry>,
        admission: Arc<ConnectionAdmission>,
        bus: SharedBus,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            registry,
            admission,
            bus,
            stale_after: None,
        }
    }

    /// Report degraded once the stream table is older than `age`.
    #[must_use]
    pub const fn with_stale_after(mut self, age: Duration) -> Self {
        self.stale_after = Some(age);
        self
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

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

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

/// Health routes over `state`.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
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
    let response = build_health_response(&state);

    if response.status == HealthStatus::Unhealthy {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
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

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let snapshot = state.registry.snapshot();
    let now = Utc::now();

    let streams = StreamsStatus {
        count: snapshot.table.len(),
        generation: snapshot.generation,
        published_at: snapshot.published_at,
    };
    let age = (now - snapshot.published_at).to_std().unwrap_or_default();
    let bus_open = !state.bus.is_closed();

    HealthResponse {
        status: determine_health_status(&streams, bus_open, age, state.stale_after),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: now,
        streams,
        sessions: SessionStatus {
            active: state.admission.total_active(),
        },
        bus_open,
    }
}

fn determine_health_status(
    streams: &StreamsStatus,
    bus_open: bool,
    age: Duration,
    stale_after: Option<Duration>,
) -> HealthStatus {
    if streams.count == 0 || !bus_open {
        return HealthStatus::Unhealthy;
    }
    match stale_after {
        Some(limit) if age > limit => HealthStatus::Degraded,
        _ => HealthStatus::Healthy,
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
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::application::services::SpecSynchronizer;
    use crate::domain::stream::{StreamConfig, StreamTable};
    use crate::infrastructure::bus::InMemoryBus;

    fn streams(count: usize) -> StreamsStatus {
        StreamsStatus {
            count,
            generation: 1,
            published_at: Utc::now(),
        }
    }

    fn state() -> Arc<HealthServerState> {
        let base = json!({
            "paths": {
                "/v2/stream/{streams}": {
                    "get": { "parameters": [ { "schema": { "items": {} } } ] }
                }
            }
        });
        let table = StreamTable::from_streams([StreamConfig::new("a", vec!["t".to_string()])]);
        let registry = Arc::new(StreamRegistry::new(SpecSynchronizer::new(base), table).unwrap());

        Arc::new(HealthServerState::new(
            "test".to_string(),
            registry,
            Arc::new(ConnectionAdmission::new(None)),
            Arc::new(InMemoryBus::new(8)),
        ))
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
    fn determine_status_healthy() {
        let status = determine_health_status(&streams(3), true, Duration::ZERO, None);
        assert_eq!(status, HealthStatus::Healthy);
    }

    #[test]
    fn determine_status_stale_table() {
        let status = determine_health_status(
            &streams(3),
            true,
            Duration::from_secs(120),
            Some(Duration::from_secs(60)),
        );
        assert_eq!(status, HealthStatus::Degraded);
    }

    #[test]
    fn determine_status_unhealthy() {
        assert_eq!(
            determine_health_status(&streams(0), true, Duration::ZERO, None),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            determine_health_status(&streams(3), false, Duration::ZERO, None),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn readiness_follows_bus() {
        let state = state();

        let response = router(Arc::clone(&state))
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        state.bus.close();
        let response = router(state)
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_reports_streams() {
        let response = router(state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["streams"]["count"], 1);
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["bus_open"], true);
    }
}
