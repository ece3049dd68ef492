//! Session Lifecycle
//!
//! Couples admission release and metrics teardown to the life of a client
//! session. Teardown can be triggered by the client going away, by the
//! transport finishing, or by the guard being dropped; whichever comes first
//! wins and the rest are no-ops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::application::ports::MetricsRecorder;
use crate::domain::admission::ConnectionAdmission;
use crate::domain::session::ClientSession;

/// What ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// The client disconnected.
    ClientClosed,
    /// The transport stream ended or failed.
    TransportFinished,
    /// The session was rejected after admission.
    Rejected,
}

impl TeardownReason {
    /// Log label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportFinished => "transport_finished",
            Self::Rejected => "rejected",
        }
    }
}

/// One-shot teardown for an admitted connection.
///
/// Created right after admission. Metrics are only decremented if
/// [`mark_connected`](Self::mark_connected) was called, matching the point
/// where they were incremented.
pub struct SessionGuard {
    session: ClientSession,
    admission: Arc<ConnectionAdmission>,
    metrics: Arc<dyn MetricsRecorder>,
    connected: AtomicBool,
    torn_down: AtomicBool,
}

impl SessionGuard {
    /// Guard an admitted session.
    #[must_use]
    pub fn new(
        session: ClientSession,
        admission: Arc<ConnectionAdmission>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            session,
            admission,
            metrics,
            connected: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }
    }

    /// The guarded session.
    #[must_use]
    pub const fn session(&self) -> &ClientSession {
        &self.session
    }

    /// Record the connection in metrics.
    ///
    /// Only the first call records anything.
    pub fn mark_connected(&self) {
        if self.torn_down.load(Ordering::Acquire) || self.connected.swap(true, Ordering::AcqRel) {
            return;
        }
        self.metrics
            .record_connect(&self.session.requested_streams, &self.session.client_ip);
        tracing::info!(
            session_id = %self.session.id,
            client_ip = %self.session.client_ip,
            streams = %self.session.streams_label(),
            topics = ?self.session.resolved_topics,
            "Client connected"
        );
    }

    /// Release admission and, if connected, metrics.
    ///
    /// Returns `true` if this call performed the teardown.
    pub fn teardown(&self, reason: TeardownReason) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.admission.release(&self.session.client_ip);

        if self.connected.load(Ordering::Acquire) {
            self.metrics
                .record_disconnect(&self.session.requested_streams, &self.session.client_ip);
            let duration = chrono::Utc::now() - self.session.started_at;
            tracing::info!(
                session_id = %self.session.id,
                client_ip = %self.session.client_ip,
                streams = %self.session.streams_label(),
                reason = reason.as_str(),
                duration_ms = duration.num_milliseconds(),
                "Client disconnected"
            );
        }
        true
    }

    /// Whether teardown already ran.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.teardown(TeardownReason::ClientClosed);
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("session", &self.session)
            .field("connected", &self.connected)
            .field("torn_down", &self.torn_down)
            .finish_non_exhaustive()
    }
}
