//! Connection Admission
//!
//! Enforces the per-client-IP ceiling on concurrent stream connections.
//!
//! The check and the increment happen under one lock, so concurrent
//! requests from the same client can never both slip past the ceiling.
//! Releases are floored at zero and entries are dropped once they reach
//! zero, keeping the map bounded by the number of connected clients.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Counter key used when no client IP is known and no ceiling applies.
pub const UNKNOWN_CLIENT_IP: &str = "UNKNOWN";

/// Tracks active connections per client IP against an optional ceiling.
#[derive(Debug, Default)]
pub struct ConnectionAdmission {
    limit: Option<u32>,
    active: Mutex<HashMap<String, u32>>,
}

impl ConnectionAdmission {
    /// Create an admission controller with an optional per-IP ceiling.
    #[must_use]
    pub fn new(limit: Option<u32>) -> Self {
        Self {
            limit,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Configured per-IP ceiling, if any.
    #[must_use]
    pub const fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// Admit a new connection from `client_ip`.
    ///
    /// Returns the key the connection was counted under, which must be
    /// passed back to [`release`](Self::release) exactly once.
    ///
    /// # Errors
    ///
    /// - `MissingClientIp` if a ceiling is configured and no IP was given
    /// - `TooManyConnections` if the client is already at the ceiling
    pub fn admit(&self, client_ip: Option<&str>) -> Result<String, AdmissionError> {
        let client_ip = client_ip.filter(|ip| !ip.is_empty());

        let key = match (self.limit, client_ip) {
            (Some(_), None) => return Err(AdmissionError::MissingClientIp),
            (_, Some(ip)) => ip.to_string(),
            (None, None) => UNKNOWN_CLIENT_IP.to_string(),
        };

        let mut active = self.active.lock();
        let count = active.entry(key.clone()).or_insert(0);

        if let Some(limit) = self.limit
            && *count >= limit
        {
            let client_ip = key;
            if *count == 0 {
                active.remove(&client_ip);
            }
            return Err(AdmissionError::TooManyConnections { client_ip, limit });
        }

        *count += 1;
        Ok(key)
    }

    /// Release a connection previously admitted under `client_ip`.
    ///
    /// Unknown keys are ignored.
    pub fn release(&self, client_ip: &str) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(client_ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                active.remove(client_ip);
            }
        }
    }

    /// Number of active connections for `client_ip`.
    #[must_use]
    pub fn active(&self, client_ip: &str) -> u32 {
        self.active.lock().get(client_ip).copied().unwrap_or(0)
    }

    /// Total active connections across all clients.
    #[must_use]
    pub fn total_active(&self) -> u64 {
        self.active.lock().values().map(|c| u64::from(*c)).sum()
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Reasons a connection is refused admission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// A ceiling is configured but the request carried no client IP.
    #[error("Missing Required X-Client-IP Header")]
    MissingClientIp,

    /// The client already holds the maximum number of connections.
    #[error("Too Many Concurrent Connections From Your Client IP")]
    TooManyConnections {
        /// Offending client IP.
        client_ip: String,
        /// Configured ceiling.
        limit: u32,
    },
}

impl AdmissionError {
    /// Short label used for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::MissingClientIp => "missing_client_ip",
            Self::TooManyConnections { .. } => "too_many_connections",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
