//! Prometheus Metrics Module
//!
//! Exposes gateway metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Clients**: connected clients per stream and client IP, lifetime
//!   connections per requested stream set, admission rejections
//! - **Messages**: delivered, redacted, and undeserializable messages
//! - **Configuration**: stream configuration loads and configured stream count
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::collections::HashMap;
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;

use crate::application::ports::{LoadOutcome, MetricsRecorder};
use crate::domain::session::streams_label;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

const CONNECTED_CLIENTS: &str = "eventstreams_connected_clients";
const CLIENT_CONNECTIONS: &str = "eventstreams_client_connections_total";
const ADMISSION_REJECTIONS: &str = "eventstreams_admission_rejections_total";
const MESSAGES_DELIVERED: &str = "eventstreams_messages_delivered_total";
const MESSAGES_REDACTED: &str = "eventstreams_messages_redacted_total";
const DESERIALIZATION_FAILURES: &str = "eventstreams_deserialization_failures_total";
const CONFIG_LOADS: &str = "eventstreams_stream_config_loads_total";
const STREAMS_CONFIGURED: &str = "eventstreams_streams_configured";

fn register_metrics() {
    // Client gauges and counters
    describe_gauge!(
        CONNECTED_CLIENTS,
        "Number of connected clients per stream and client IP"
    );
    describe_counter!(
        CLIENT_CONNECTIONS,
        "Total client connections per requested stream set"
    );
    describe_counter!(
        ADMISSION_REJECTIONS,
        "Total connections refused before streaming, by reason"
    );

    // Message counters
    describe_counter!(MESSAGES_DELIVERED, "Total messages delivered to clients");
    describe_counter!(MESSAGES_REDACTED, "Total messages redacted, by stream");
    describe_counter!(
        DESERIALIZATION_FAILURES,
        "Total bus messages skipped because they could not be deserialized"
    );

    // Configuration
    describe_counter!(CONFIG_LOADS, "Total stream configuration loads by outcome");
    describe_gauge!(STREAMS_CONFIGURED, "Number of streams currently published");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record messages delivered to a client.
pub fn record_messages_delivered(count: u64) {
    counter!(MESSAGES_DELIVERED).increment(count);
}

/// Record a bus message skipped because it could not be deserialized.
pub fn record_deserialization_failure(topic: &str) {
    counter!(DESERIALIZATION_FAILURES, "topic" => topic.to_string()).increment(1);
}

/// Update the number of published streams.
#[allow(clippy::cast_precision_loss)]
pub fn set_streams_configured(count: usize) {
    gauge!(STREAMS_CONFIGURED).set(count as f64);
}

// =============================================================================
// Recorder
// =============================================================================

/// `MetricsRecorder` backed by the global Prometheus recorder.
///
/// Keeps its own count of connected clients per (stream, client IP) so the
/// gauges are set to exact values and can be read back.
#[derive(Debug, Default)]
pub struct PrometheusRecorder {
    connected: Mutex<HashMap<(String, String), u64>>,
}

impl PrometheusRecorder {
    /// Create a recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connected clients for `stream` from `client_ip`.
    #[must_use]
    pub fn connected_clients(&self, stream: &str, client_ip: &str) -> u64 {
        self.connected
            .lock()
            .get(&(stream.to_string(), client_ip.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Connected clients summed over every stream and client IP.
    #[must_use]
    pub fn total_connected(&self) -> u64 {
        self.connected.lock().values().sum()
    }

    #[allow(clippy::cast_precision_loss)]
    fn adjust(&self, streams: &[String], client_ip: &str, up: bool) {
        let mut connected = self.connected.lock();
        for stream in streams {
            let key = (stream.clone(), client_ip.to_string());
            let count = connected.entry(key.clone()).or_insert(0);
            *count = if up {
                count.saturating_add(1)
            } else {
                count.saturating_sub(1)
            };
            let value = *count;
            if value == 0 {
                connected.remove(&key);
            }

            gauge!(
                CONNECTED_CLIENTS,
                "stream" => stream.clone(),
                "client_ip" => client_ip.to_string()
            )
            .set(value as f64);
        }
    }
}

impl MetricsRecorder for PrometheusRecorder {
    fn record_connect(&self, streams: &[String], client_ip: &str) {
        self.adjust(streams, client_ip, true);
        counter!(CLIENT_CONNECTIONS, "streams" => streams_label(streams)).increment(1);
    }

    fn record_disconnect(&self, streams: &[String], client_ip: &str) {
        self.adjust(streams, client_ip, false);
    }

    fn record_admission_rejected(&self, reason: &'static str) {
        counter!(ADMISSION_REJECTIONS, "reason" => reason).increment(1);
    }

    fn record_redaction(&self, stream: &str) {
        counter!(MESSAGES_REDACTED, "stream" => stream.to_string()).increment(1);
    }

    fn record_config_load(&self, outcome: LoadOutcome, stream_count: usize) {
        counter!(CONFIG_LOADS, "outcome" => outcome.as_str()).increment(1);
        if outcome == LoadOutcome::Success {
            set_streams_configured(stream_count);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
