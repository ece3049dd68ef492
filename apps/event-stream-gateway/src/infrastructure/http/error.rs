//! HTTP Error Responses
//!
//! Maps gateway errors onto problem bodies of the form
//! `{status, type, title, detail}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::ports::TransportError;
use crate::domain::admission::AdmissionError;
use crate::domain::stream::StreamNotFound;

/// JSON body of an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    /// HTTP status code.
    pub status: u16,
    /// Machine readable error type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Short summary.
    pub title: String,
    /// Human readable explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Admission refused the connection.
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// One or more requested streams do not exist.
    #[error(transparent)]
    StreamNotFound(#[from] StreamNotFound),

    /// The `since` parameter could not be parsed.
    #[error("invalid since timestamp: {0}")]
    InvalidTimestamp(String),

    /// The transport could not start consuming.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A schema path contained characters outside the allowed set.
    #[error("invalid schema uri: {0}")]
    InvalidSchemaUri(String),

    /// The schema repository could not be reached or failed.
    #[error("schema repository error: {0}")]
    SchemaUpstream(String),

    /// The requested resource is disabled or absent.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Admission(AdmissionError::MissingClientIp)
            | Self::InvalidTimestamp(_)
            | Self::InvalidSchemaUri(_)
            | Self::Transport(TransportError::InvalidResumeState(_)) => StatusCode::BAD_REQUEST,
            Self::Admission(AdmissionError::TooManyConnections { .. }) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::StreamNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Transport(TransportError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::SchemaUpstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Problem body for this error.
    #[must_use]
    pub fn problem(&self) -> Problem {
        let (kind, title, detail) = match self {
            Self::Admission(e @ AdmissionError::MissingClientIp) => (
                "bad_request",
                e.to_string(),
                "X-Client-IP is a required request header".to_string(),
            ),
            Self::Admission(e @ AdmissionError::TooManyConnections { .. }) => (
                "too_many_requests",
                e.to_string(),
                "Your HTTP client is likely opening too many concurrent connections.".to_string(),
            ),
            Self::StreamNotFound(e) => ("not_found", "Stream Not Found".to_string(), e.to_string()),
            Self::InvalidTimestamp(since) => (
                "invalid_timestamp",
                "Invalid timestamp".to_string(),
                format!(
                    "since timestamp is not a UTC milliseconds unix epoch and was not parseable: \
                     '{since}'"
                ),
            ),
            Self::Transport(TransportError::InvalidResumeState(reason)) => (
                "bad_request",
                "Invalid Last-Event-ID".to_string(),
                reason.clone(),
            ),
            Self::Transport(TransportError::Unavailable(reason)) => (
                "transport_unavailable",
                "Event Transport Unavailable".to_string(),
                reason.clone(),
            ),
            Self::InvalidSchemaUri(uri) => (
                "user_error",
                "InvalidSchemaURI".to_string(),
                format!("Invalid schema uri: '{uri}'"),
            ),
            Self::SchemaUpstream(reason) => (
                "bad_gateway",
                "Schema Repository Error".to_string(),
                reason.clone(),
            ),
            Self::NotFound(what) => ("not_found", "Not Found".to_string(), what.clone()),
        };

        Problem {
            status: self.status().as_u16(),
            kind: kind.to_string(),
            title,
            detail: Some(detail),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.problem())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_client_ip_is_bad_request() {
        let error = ApiError::from(AdmissionError::MissingClientIp);
        let problem = error.problem();

        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
        assert_eq!(problem.kind, "bad_request");
        assert_eq!(problem.title, "Missing Required X-Client-IP Header");
    }

    #[test]
    fn too_many_connections_is_429() {
        let error = ApiError::from(AdmissionError::TooManyConnections {
            client_ip: "1.1.1.1".to_string(),
            limit: 1,
        });

        assert_eq!(error.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            error.problem().title,
            "Too Many Concurrent Connections From Your Client IP"
        );
    }

    #[test]
    fn stream_not_found_lists_streams() {
        let error = ApiError::from(StreamNotFound {
            invalid: vec!["a".to_string(), "b".to_string()],
        });

        let body = serde_json::to_value(error.problem()).unwrap();
        assert_eq!(
            body,
            json!({
                "status": 404,
                "type": "not_found",
                "title": "Stream Not Found",
                "detail": "Invalid streams: a,b"
            })
        );
    }

    #[test]
    fn invalid_timestamp_quotes_input() {
        let problem = ApiError::InvalidTimestamp("yesterday".to_string()).problem();
        assert_eq!(problem.status, 400);
        assert_eq!(problem.kind, "invalid_timestamp");
        assert!(problem.detail.unwrap().ends_with("'yesterday'"));
    }

    #[test]
    fn transport_errors() {
        let unavailable = ApiError::from(TransportError::Unavailable("closed".to_string()));
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(unavailable.problem().kind, "transport_unavailable");

        let resume = ApiError::from(TransportError::InvalidResumeState("bad".to_string()));
        assert_eq!(resume.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn invalid_schema_uri_is_user_error() {
        let problem = ApiError::InvalidSchemaUri("a b".to_string()).problem();
        assert_eq!(problem.kind, "user_error");
        assert_eq!(problem.detail.as_deref(), Some("Invalid schema uri: 'a b'"));
    }
}
