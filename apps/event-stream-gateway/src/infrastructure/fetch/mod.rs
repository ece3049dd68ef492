//! Document Fetching
//!
//! `ConfigSource` adapter that loads JSON or YAML documents over HTTP(S) or
//! from the local filesystem.
//!
//! - `http://` and `https://` URIs are fetched with reqwest, sending the
//!   configured extra headers
//! - `file://` URIs and bare paths are read with `tokio::fs`
//!
//! Documents whose path ends in `.yaml` or `.yml` are parsed as YAML,
//! everything else as JSON.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::application::ports::{ConfigSource, FetchError};
use crate::infrastructure::config::StreamsSettings;

/// Fetches configuration and schema documents.
#[derive(Debug, Clone)]
pub struct HttpConfigSource {
    client: Client,
}

impl HttpConfigSource {
    /// Create a source with a request timeout and extra request headers.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Client` if a header is invalid or the HTTP client
    /// cannot be built.
    pub fn new(timeout: Duration, headers: &HashMap<String, String>) -> Result<Self, FetchError> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FetchError::Client(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FetchError::Client(format!("invalid value for header {name}: {e}")))?;
            default_headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    /// Create a source from the streams configuration section.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn from_settings(settings: &StreamsSettings) -> Result<Self, FetchError> {
        Self::new(settings.fetch_timeout(), &settings.config_uri_headers)
    }

    async fn fetch_http(&self, uri: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                uri: uri.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| FetchError::Request {
            uri: uri.to_string(),
            message: e.to_string(),
        })
    }
}

async fn read_file(path: &str) -> Result<String, FetchError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| FetchError::Io {
            path: path.to_string(),
            source: e,
        })
}

/// Parse `body` as YAML or JSON depending on the extension of `uri`.
///
/// # Errors
///
/// Returns `FetchError::Parse` if the body is not a valid document.
pub fn parse_document(uri: &str, body: &str) -> Result<Value, FetchError> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let is_yaml = Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    let parsed = if is_yaml {
        serde_yaml_bw::from_str::<Value>(body).map_err(|e| e.to_string())
    } else {
        serde_json::from_str::<Value>(body).map_err(|e| e.to_string())
    };

    parsed.map_err(|message| FetchError::Parse {
        uri: uri.to_string(),
        message,
    })
}

#[async_trait]
impl ConfigSource for HttpConfigSource {
    async fn fetch(&self, uri: &str) -> Result<Value, FetchError> {
        let body = if uri.starts_with("http://") || uri.starts_with("https://") {
            self.fetch_http(uri).await?
        } else if let Some(path) = uri.strip_prefix("file://") {
            read_file(path).await?
        } else if uri.contains("://") {
            return Err(FetchError::UnsupportedUri(uri.to_string()));
        } else {
            read_file(uri).await?
        };

        tracing::debug!(uri, bytes = body.len(), "Fetched document");
        parse_document(uri, &body)
    }
}
