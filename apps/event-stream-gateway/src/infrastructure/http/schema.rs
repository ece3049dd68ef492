//! Schema Repository Proxy
//!
//! `GET /v2/schema/{*path}` forwards to the configured schema repository.
//! Successful and client-error responses are cached in-process, keyed by
//! path, and replayed without contacting the repository again.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use parking_lot::RwLock;
use regex::Regex;
use reqwest::Client;

use super::error::ApiError;
use super::server::AppState;

/// A cached upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSchema {
    /// Upstream status code.
    pub status: u16,
    /// Upstream content type, `application/json` if it sent none.
    pub content_type: String,
    /// Response body.
    pub body: Bytes,
}

impl IntoResponse for CachedSchema {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_GATEWAY);
        (status, [(header::CONTENT_TYPE, self.content_type)], self.body).into_response()
    }
}

/// Proxies and caches schema documents.
#[derive(Debug)]
pub struct SchemaProxy {
    upstream: String,
    client: Client,
    cache: RwLock<HashMap<String, CachedSchema>>,
}

impl SchemaProxy {
    /// Create a proxy for the repository at `upstream`.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::SchemaUpstream` if the HTTP client cannot be built.
    pub fn new(upstream: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::SchemaUpstream(e.to_string()))?;

        Ok(Self {
            upstream: upstream.trim_end_matches('/').to_string(),
            client,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Number of cached responses.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }

    /// Fetch `path` from the repository, or from cache.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::InvalidSchemaUri` for paths with characters other
    /// than word characters, `/`, `.` and `-`, and `ApiError::SchemaUpstream`
    /// when the repository fails or answers with a server error.
    pub async fn get(&self, path: &str) -> Result<CachedSchema, ApiError> {
        if !is_valid_schema_path(path) {
            return Err(ApiError::InvalidSchemaUri(path.to_string()));
        }

        let cached = self.cache.read().get(path).cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let url = format!("{}/{path}", self.upstream);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::SchemaUpstream(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ApiError::SchemaUpstream(format!(
                "{url} returned status {status}"
            )));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::SchemaUpstream(e.to_string()))?;

        let result = CachedSchema {
            status: status.as_u16(),
            content_type,
            body,
        };

        if status.is_success() || status.is_client_error() {
            tracing::debug!(path, status = result.status, "Caching schema response");
            self.cache
                .write()
                .insert(path.to_string(), result.clone());
        }
        Ok(result)
    }
}

/// Whether `path` only contains word characters, `/`, `.` and `-`.
#[allow(clippy::expect_used)]
#[must_use]
pub fn is_valid_schema_path(path: &str) -> bool {
    static SCHEMA_PATH: OnceLock<Regex> = OnceLock::new();
    SCHEMA_PATH
        .get_or_init(|| Regex::new(r"^[\w/.-]+$").expect("schema path regex is valid"))
        .is_match(path)
}

/// Handle `GET /v2/schema/{*path}`.
///
/// # Errors
///
/// See [`SchemaProxy::get`]; `ApiError::NotFound` when no repository is
/// configured.
pub async fn proxy_schema(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<CachedSchema, ApiError> {
    let Some(proxy) = state.schema_proxy.as_deref() else {
        return Err(ApiError::NotFound("schema proxy is not configured".to_string()));
    };
    proxy.get(&path).await
}
