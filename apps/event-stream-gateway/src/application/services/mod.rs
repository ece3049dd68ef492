//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `StreamConfigResolver`: builds stream tables from configuration
//! - `SpecSynchronizer`: keeps the API description in step with the table
//! - `StreamRegistry`: publishes table and description snapshots
//! - `StreamRefresher`: periodic reload of the stream table
//! - `SessionGuard`: exactly-once teardown of client sessions
//! - `RedactionPipeline`: per-message deserialize and redact

/// Per-message deserialize and redact.
pub mod redaction;
/// Periodic stream table reload.
pub mod refresh;
/// Published table and description snapshots.
pub mod registry;
/// Stream configuration loading.
pub mod resolver;
/// Client session teardown.
pub mod session;
/// API description generation.
pub mod spec;

pub use redaction::{AuditContext, RedactionPipeline};
pub use refresh::{RefreshError, StreamRefresher};
pub use registry::{RegistrySnapshot, StreamRegistry};
pub use resolver::{ResolverOptions, StreamConfigError, StreamConfigResolver};
pub use session::{SessionGuard, TeardownReason};
pub use spec::{STREAMS_ROUTE, SpecError, SpecSynchronizer};
