//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ConfigSource`: fetches configuration and schema documents by URI
//! - `ConsumerTransport`: consumes bus topics for one client session
//! - `MetricsRecorder`: records connection and processing metrics
//!
//! ## Callback Ports
//!
//! - `MessageDeserializer`: per-message transform the transport applies
//!   before handing a message to the session

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};

use crate::domain::message::{BusMessage, DeserializationError, DeserializedMessage};
use crate::domain::session::SessionId;

// =============================================================================
// Configuration Source
// =============================================================================

/// Fetches JSON documents by URI.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Fetch and parse the document at `uri`.
    async fn fetch(&self, uri: &str) -> Result<Value, FetchError>;
}

/// Failure to fetch or parse a document.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request could not be sent or the body could not be read.
    #[error("request to {uri} failed: {message}")]
    Request {
        /// Requested URI.
        uri: String,
        /// Underlying error.
        message: String,
    },

    /// The server answered with a non-success status.
    #[error("request to {uri} returned status {status}")]
    Status {
        /// Requested URI.
        uri: String,
        /// HTTP status code.
        status: u16,
    },

    /// Reading a local file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Local path.
        path: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The body was not a valid document.
    #[error("failed to parse {uri}: {message}")]
    Parse {
        /// Requested URI.
        uri: String,
        /// Parser error.
        message: String,
    },

    /// No way to fetch this URI.
    #[error("unsupported URI: {0}")]
    UnsupportedUri(String),

    /// The fetching client could not be set up.
    #[error("failed to configure fetch client: {0}")]
    Client(String),
}

// =============================================================================
// Consumer Transport
// =============================================================================

/// Turns a raw bus message into the message delivered to the client.
pub trait MessageDeserializer: Send + Sync {
    /// Deserialize (and possibly transform) one message.
    ///
    /// # Errors
    ///
    /// Returns `DeserializationError` when the payload is unusable; the
    /// transport skips that message.
    fn deserialize(&self, message: BusMessage) -> Result<DeserializedMessage, DeserializationError>;
}

/// Everything the transport needs to serve one session.
#[derive(Clone)]
pub struct ConsumeRequest {
    /// Session the consumer belongs to.
    pub session_id: SessionId,
    /// Topics to consume.
    pub topics: Vec<String>,
    /// Topics the client may consume, used to validate resume state.
    pub allowed_topics: Vec<String>,
    /// Use message timestamps instead of offsets in event ids.
    pub use_timestamp_for_id: bool,
    /// Resume state from the `Last-Event-ID` header.
    pub last_event_id: Option<String>,
    /// Start consuming at this time, in milliseconds since the epoch.
    pub at_timestamp: Option<i64>,
    /// Opaque consumer settings passed through from configuration.
    pub consumer_config: Map<String, Value>,
    /// Per-message transform.
    pub deserializer: Arc<dyn MessageDeserializer>,
}

impl std::fmt::Debug for ConsumeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumeRequest")
            .field("session_id", &self.session_id)
            .field("topics", &self.topics)
            .field("use_timestamp_for_id", &self.use_timestamp_for_id)
            .field("last_event_id", &self.last_event_id)
            .field("at_timestamp", &self.at_timestamp)
            .finish_non_exhaustive()
    }
}

/// A deserialized message ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    /// Resume token for the client, sent as the SSE event id.
    pub id: String,
    /// The message.
    pub message: DeserializedMessage,
}

/// Stream of events for one session; it ends when the transport finishes.
pub type EventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Consumes bus topics on behalf of a client session.
#[async_trait]
pub trait ConsumerTransport: Send + Sync {
    /// Start consuming.
    async fn open(&self, request: ConsumeRequest) -> Result<EventStream, TransportError>;
}

/// Failure to start consuming.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The bus is not reachable or has shut down.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// The requested resume state is not usable.
    #[error("invalid resume state: {0}")]
    InvalidResumeState(String),
}

// =============================================================================
// Metrics
// =============================================================================

/// Outcome of a stream configuration load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A new table was published.
    Success,
    /// Loading failed.
    Failure,
}

impl LoadOutcome {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Records gateway metrics.
#[cfg_attr(test, mockall::automock)]
pub trait MetricsRecorder: Send + Sync {
    /// A session started on `streams`.
    fn record_connect(&self, streams: &[String], client_ip: &str);

    /// A session on `streams` ended.
    fn record_disconnect(&self, streams: &[String], client_ip: &str);

    /// A connection was refused admission.
    fn record_admission_rejected(&self, reason: &'static str);

    /// A message from `stream` was redacted.
    fn record_redaction(&self, stream: &str);

    /// A stream configuration load finished.
    fn record_config_load(&self, outcome: LoadOutcome, stream_count: usize);
}

/// Metrics recorder that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn record_connect(&self, _streams: &[String], _client_ip: &str) {}
    fn record_disconnect(&self, _streams: &[String], _client_ip: &str) {}
    fn record_admission_rejected(&self, _reason: &'static str) {}
    fn record_redaction(&self, _stream: &str) {}
    fn record_config_load(&self, _outcome: LoadOutcome, _stream_count: usize) {}
}
