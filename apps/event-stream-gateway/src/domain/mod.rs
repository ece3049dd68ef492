//! Domain Layer - Core gateway types and policies.
//!
//! Pure types and rules with no I/O: the stream table and topic resolution,
//! per-client admission, bus message deserialization, client sessions and
//! the redaction policy.

/// Connection admission per client IP.
pub mod admission;

/// Bus messages and their deserialization.
pub mod message;

/// Message redaction policy.
pub mod redaction;

/// Client session state.
pub mod session;

/// Stream configuration and topic resolution.
pub mod stream;
