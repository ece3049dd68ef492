//! Client Session Types
//!
//! A session is one client's long-lived stream connection, from admission
//! to teardown.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Unique identifier for a client session.
pub type SessionId = Uuid;

/// State of one admitted client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    /// Session identifier, used to correlate logs.
    pub id: SessionId,
    /// Key the connection is counted under in admission.
    pub client_ip: String,
    /// Stream names in the order the client asked for them.
    pub requested_streams: Vec<String>,
    /// Deduplicated topics the transport consumes.
    pub resolved_topics: Vec<String>,
    /// When the session was admitted.
    pub started_at: DateTime<Utc>,
}

impl ClientSession {
    /// Start a new session.
    #[must_use]
    pub fn new(
        client_ip: impl Into<String>,
        requested_streams: Vec<String>,
        resolved_topics: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_ip: client_ip.into(),
            requested_streams,
            resolved_topics,
            started_at: Utc::now(),
        }
    }

    /// Requested streams sorted and comma-joined, as used for the
    /// lifetime connection counter label.
    #[must_use]
    pub fn streams_label(&self) -> String {
        streams_label(&self.requested_streams)
    }
}

/// Sort and comma-join a stream list.
#[must_use]
pub fn streams_label<S: AsRef<str>>(streams: &[S]) -> String {
    let mut sorted: Vec<&str> = streams.iter().map(AsRef::as_ref).collect();
    sorted.sort_unstable();
    sorted.join(",")
}
