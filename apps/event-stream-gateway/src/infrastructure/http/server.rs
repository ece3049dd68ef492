//! Gateway HTTP Server
//!
//! Router construction and the serving loop for the public stream API.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::headers::HeaderPolicy;
use super::schema::{SchemaProxy, proxy_schema};
use super::{docs, stream};
use crate::application::ports::{ConsumerTransport, MetricsRecorder};
use crate::application::services::{RedactionPipeline, STREAMS_ROUTE, StreamRegistry};
use crate::domain::admission::ConnectionAdmission;
use crate::infrastructure::config::GatewayConfig;

/// Route of the schema proxy.
pub const SCHEMA_ROUTE: &str = "/v2/schema/{*path}";

// =============================================================================
// State
// =============================================================================

/// Per-request settings taken from configuration.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Use message timestamps in event ids.
    pub use_timestamp_for_id: bool,
    /// SSE keep-alive interval.
    pub keep_alive: Duration,
    /// Consumer settings passed to the transport.
    pub consumer_config: Map<String, Value>,
    /// Serve the documentation page.
    pub ui_enabled: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            use_timestamp_for_id: true,
            keep_alive: Duration::from_secs(15),
            consumer_config: Map::new(),
            ui_enabled: true,
        }
    }
}

impl From<&GatewayConfig> for HttpSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            use_timestamp_for_id: config.session.use_timestamp_for_id,
            keep_alive: config.session.keep_alive(),
            consumer_config: config.transport.consumer_config.clone(),
            ui_enabled: config.server.ui_enabled,
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Published streams and API description.
    pub registry: Arc<StreamRegistry>,
    /// Per-client connection ceiling.
    pub admission: Arc<ConnectionAdmission>,
    /// Bus consumer transport.
    pub transport: Arc<dyn ConsumerTransport>,
    /// Deserialize-and-redact transform, specialized per client.
    pub pipeline: RedactionPipeline,
    /// Metrics sink.
    pub metrics: Arc<dyn MetricsRecorder>,
    /// Request settings.
    pub settings: Arc<HttpSettings>,
    /// Schema repository proxy, when configured.
    pub schema_proxy: Option<Arc<SchemaProxy>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("streams", &self.registry.table().len())
            .field("settings", &self.settings)
            .field("schema_proxy", &self.schema_proxy.is_some())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Router
// =============================================================================

/// Create the HTTP router with all endpoints.
#[must_use]
pub fn create_router(state: AppState, policy: HeaderPolicy) -> Router {
    let mut router = Router::new()
        .route("/", get(docs::root))
        .route("/rc", get(docs::retired_rc))
        .route("/robots.txt", get(docs::robots))
        .route(STREAMS_ROUTE, get(stream::stream_events));

    if state.schema_proxy.is_some() {
        router = router.route(SCHEMA_ROUTE, get(proxy_schema));
    }

    policy.apply(router).with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// Public stream API server.
pub struct GatewayServer {
    interface: String,
    port: u16,
    router: Router,
    cancel: CancellationToken,
}

impl GatewayServer {
    /// Create a server for `router`.
    #[must_use]
    pub const fn new(
        interface: String,
        port: u16,
        router: Router,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            interface,
            port,
            router,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let addr = format!("{}:{}", self.interface, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(addr.clone(), e.to_string()))?;

        tracing::info!(addr = %addr, "Stream server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Stream server stopped");
        Ok(())
    }
}

/// Stream server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to address.
    #[error("failed to bind stream server to {0}: {1}")]
    BindFailed(String, String),

    /// Server encountered a fatal error.
    #[error("stream server failed: {0}")]
    ServerFailed(String),
}
