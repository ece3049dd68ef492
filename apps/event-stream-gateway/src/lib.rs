#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Event Stream Gateway - Server-Sent Events over Message Bus Topics
//!
//! An HTTP gateway that exposes named event streams, each backed by one or
//! more message bus topics, as resumable Server-Sent-Events connections.
//! Stream definitions are loaded from a configuration document and kept
//! fresh; every delivered message passes through a redaction policy.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: Stream tables, admission, message deserialization, redaction
//!   - `stream`: Stream configs and topic resolution
//!   - `admission`: Per-client-IP connection ceiling
//!   - `message`: Bus messages and transport metadata
//!   - `redaction`: Redaction rules and per-case field stripping
//!   - `session`: Client session state
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Config source, consumer transport, metrics recorder
//!   - `services`: Stream config resolution, registry and refresh, API
//!     description sync, session lifecycle, redaction pipeline
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `http`: Stream API, documentation routes, schema proxy
//!   - `bus`: In-process message bus transport
//!   - `fetch`: HTTP and file document fetching
//!   - `config`: YAML configuration
//!   - `health`, `metrics`, `telemetry`: Operations
//!
//! # Data Flow
//!
//! ```text
//! config URI ──► Resolver ──► Registry (table + API description)
//!                                 │
//! client ──► admit ──► resolve topics ──► transport ──► redact ──► SSE
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::admission::{AdmissionError, ConnectionAdmission};
pub use domain::message::{BusMessage, DeserializedMessage, Payload};
pub use domain::redaction::RedactionRuleSet;
pub use domain::stream::{StreamConfig, StreamNotFound, StreamTable};

// Application services
pub use application::services::{
    RedactionPipeline, SpecSynchronizer, StreamConfigResolver, StreamRefresher, StreamRegistry,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, GatewayConfig};

// HTTP server
pub use infrastructure::http::{AppState, GatewayServer, HeaderPolicy, create_router};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Message bus
pub use infrastructure::bus::{InMemoryBus, SharedBus};

// Metrics
pub use infrastructure::metrics::{PrometheusRecorder, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
