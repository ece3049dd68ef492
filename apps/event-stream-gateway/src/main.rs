//! Event Stream Gateway Binary
//!
//! Starts the stream API and health servers.
//!
//! # Usage
//!
//! ```bash
//! GATEWAY_CONFIG=config.yaml cargo run --bin event-stream-gateway
//! ```
//!
//! # Environment Variables
//!
//! - `GATEWAY_CONFIG`: Path to the YAML configuration (default: config.yaml)
//! - `OTEL_ENABLED`: Export traces over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: event-stream-gateway)
//! - `RUST_LOG`: Log level (default: info)
//!
//! Values in the configuration file may reference environment variables as
//! `${VAR}` or `${VAR:-default}`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use event_stream_gateway::application::ports::{LoadOutcome, MetricsRecorder};
use event_stream_gateway::application::services::{ResolverOptions, StreamRefresher};
use event_stream_gateway::infrastructure::fetch::HttpConfigSource;
use event_stream_gateway::infrastructure::http::{HttpSettings, SchemaProxy};
use event_stream_gateway::infrastructure::openapi::base_spec;
use event_stream_gateway::infrastructure::telemetry;
use event_stream_gateway::{
    AppState, ConnectionAdmission, GatewayConfig, GatewayServer, HeaderPolicy, HealthServer,
    HealthServerState, InMemoryBus, PrometheusRecorder, RedactionPipeline, RedactionRuleSet,
    SpecSynchronizer, StreamConfigResolver, StreamRegistry, create_router, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Event Stream Gateway");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config_path = std::env::var("GATEWAY_CONFIG").ok();
    let config = GatewayConfig::load(config_path.as_deref())
        .context("failed to load gateway configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let metrics: Arc<dyn MetricsRecorder> = Arc::new(PrometheusRecorder::new());

    // Resolve streams; a gateway with nothing to serve does not start
    let source = Arc::new(HttpConfigSource::from_settings(&config.streams)?);
    let resolver = Arc::new(StreamConfigResolver::new(
        source,
        ResolverOptions::from(&config.streams),
    ));
    let table = resolver
        .load()
        .await
        .context("failed to load stream configuration")?;
    metrics.record_config_load(LoadOutcome::Success, table.len());

    let synchronizer = SpecSynchronizer::new(base_spec()?);
    let registry = Arc::new(StreamRegistry::new(synchronizer, table)?);

    let refresh_handle = StreamRefresher::new(
        Arc::clone(&resolver),
        Arc::clone(&registry),
        Arc::clone(&metrics),
    )
    .spawn(config.streams.ttl(), shutdown_token.clone());

    // Sessions. The in-process bus has no producer here; swap in a broker
    // transport to feed real topics.
    let bus = Arc::new(InMemoryBus::new(config.transport.channel_capacity));
    let admission = Arc::new(ConnectionAdmission::new(
        config.session.client_ip_connection_limit,
    ));
    let rules = Arc::new(RedactionRuleSet::from_config(&config.redaction.rules));
    tracing::info!(domains = rules.domain_count(), "Redaction rules loaded");
    let pipeline = RedactionPipeline::new(rules, Arc::clone(&metrics))
        .with_audit_log(config.redaction.audit_log);

    let schema_proxy = config
        .streams
        .schema_proxy_uri
        .as_deref()
        .map(|uri| SchemaProxy::new(uri, config.streams.fetch_timeout()))
        .transpose()?
        .map(Arc::new);

    let state = AppState {
        registry: Arc::clone(&registry),
        admission: Arc::clone(&admission),
        transport: Arc::clone(&bus) as _,
        pipeline,
        metrics,
        settings: Arc::new(HttpSettings::from(&config)),
        schema_proxy,
    };
    let router = create_router(state, HeaderPolicy::from_settings(&config.server));
    let server = GatewayServer::new(
        config.server.interface.clone(),
        config.server.port,
        router,
        shutdown_token.clone(),
    );

    // Initialize health server
    let mut health_state = HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&registry),
        Arc::clone(&admission),
        Arc::clone(&bus),
    );
    if let Some(stale_after) = config.streams.stale_after() {
        health_state = health_state.with_stale_after(stale_after);
    }
    let health_server = HealthServer::new(
        config.server.health_port,
        Arc::new(health_state),
        shutdown_token.clone(),
    );

    // Spawn health server
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn stream server
    let server_shutdown = shutdown_token.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "Stream server error");
            server_shutdown.cancel();
        }
    });

    tracing::info!("Event stream gateway ready");

    await_shutdown(shutdown_token).await;

    // Open SSE bodies only end once the bus closes
    bus.close();

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, server_handle)
        .await
        .is_err()
    {
        tracing::warn!("Stream server did not stop within the shutdown timeout");
    }
    if let Some(handle) = refresh_handle {
        let _ = handle.await;
    }

    tracing::info!("Event stream gateway stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        interface = %config.server.interface,
        port = config.server.port,
        health_port = config.server.health_port,
        config_uri = config.streams.config_uri.as_deref(),
        static_streams = config.streams.static_streams.is_some(),
        config_ttl_secs = config.streams.config_ttl_secs,
        connection_limit = config.session.client_ip_connection_limit,
        "Configuration loaded"
    );
    tracing::debug!(
        schema_base_uris = ?config.streams.schema_base_uris,
        schema_proxy_uri = config.streams.schema_proxy_uri.as_deref(),
        redaction_domains = config.redaction.rules.len(),
        "Stream sources"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT), or for the token to be
/// cancelled elsewhere.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Shutdown requested internally");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
