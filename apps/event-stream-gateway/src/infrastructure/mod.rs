//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the HTTP surfaces.

/// In-process message bus implementing the consumer transport.
pub mod bus;

/// YAML configuration loading.
pub mod config;

/// Configuration and schema document fetching.
pub mod fetch;

/// Health check HTTP endpoint.
pub mod health;

/// Public stream API, documentation routes, and schema proxy.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Embedded base API description.
pub mod openapi;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
