//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (config source, bus transport, metrics).
pub mod ports;

/// Application services for stream configuration and client sessions.
pub mod services;
