//! Gateway Configuration Settings
//!
//! Configuration types for the gateway, loaded from a YAML file with
//! `${VAR}` / `${VAR:-default}` environment variable interpolation.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::application::services::ResolverOptions;

/// Default config file path.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Default Content-Security-Policy header value.
pub const DEFAULT_CSP: &str = "default-src 'self'; object-src 'none'; media-src *; img-src *; \
                               style-src *; frame-ancestors 'self'";

// =============================================================================
// Server
// =============================================================================

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Bind address.
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Stream API port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Health and metrics port.
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    /// `Access-Control-Allow-Origin` value; `None` disables CORS headers.
    #[serde(default = "default_cors")]
    pub cors: Option<String>,
    /// Content-Security-Policy value; `None` disables security headers.
    #[serde(default = "default_csp")]
    pub csp: Option<String>,
    /// Serve the documentation page at `/?doc`.
    #[serde(default = "default_true")]
    pub ui_enabled: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            port: default_port(),
            health_port: default_health_port(),
            cors: default_cors(),
            csp: default_csp(),
            ui_enabled: true,
        }
    }
}

fn default_interface() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8092
}

const fn default_health_port() -> u16 {
    8093
}

#[allow(clippy::unnecessary_wraps)]
fn default_cors() -> Option<String> {
    Some("*".to_string())
}

#[allow(clippy::unnecessary_wraps)]
fn default_csp() -> Option<String> {
    Some(DEFAULT_CSP.to_string())
}

const fn default_true() -> bool {
    true
}

// =============================================================================
// Streams
// =============================================================================

/// Where streams come from and how they are post-processed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamsSettings {
    /// URI of the stream configuration document.
    #[serde(default)]
    pub config_uri: Option<String>,
    /// Extra HTTP headers sent when fetching documents.
    #[serde(default)]
    pub config_uri_headers: HashMap<String, String>,
    /// Dotted path to the stream map inside the fetched document.
    #[serde(default)]
    pub config_object_path: Option<String>,
    /// Refresh interval in seconds; 0 disables refreshing.
    #[serde(default)]
    pub config_ttl_secs: u64,
    /// Per-stream defaults merged underneath fetched values.
    #[serde(default)]
    pub config_defaults: Map<String, Value>,
    /// If set, only these streams are exposed.
    #[serde(default)]
    pub allowed_streams: Option<Vec<String>>,
    /// Streams defined inline instead of fetched.
    #[serde(default)]
    pub static_streams: Option<Map<String, Value>>,
    /// Base URIs for relative schema URIs, tried in order.
    #[serde(default)]
    pub schema_base_uris: Vec<String>,
    /// Version used to synthesize schema URIs from schema titles.
    #[serde(default)]
    pub schema_latest_version: Option<String>,
    /// Upstream schema repository proxied at `/v2/schema/`.
    #[serde(default)]
    pub schema_proxy_uri: Option<String>,
    /// Timeout for document fetches, in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

const fn default_fetch_timeout_secs() -> u64 {
    10
}

impl StreamsSettings {
    /// Refresh interval.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.config_ttl_secs)
    }

    /// Fetch timeout.
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Age after which the published stream table counts as stale: three
    /// refresh intervals, or `None` when refreshing is off.
    #[must_use]
    pub fn stale_after(&self) -> Option<Duration> {
        let ttl = self.ttl();
        (!ttl.is_zero()).then_some(ttl.saturating_mul(3))
    }
}

impl From<&StreamsSettings> for ResolverOptions {
    fn from(settings: &StreamsSettings) -> Self {
        Self {
            config_uri: settings.config_uri.clone(),
            object_path: settings.config_object_path.clone(),
            defaults: settings.config_defaults.clone(),
            allowed_streams: settings.allowed_streams.clone(),
            static_streams: settings.static_streams.clone(),
            schema_base_uris: settings.schema_base_uris.clone(),
            schema_latest_version: settings.schema_latest_version.clone(),
        }
    }
}

// =============================================================================
// Sessions, Redaction, Transport
// =============================================================================

/// Client session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Maximum concurrent connections per client IP.
    #[serde(default)]
    pub client_ip_connection_limit: Option<u32>,
    /// Use message timestamps rather than offsets in event ids.
    #[serde(default = "default_true")]
    pub use_timestamp_for_id: bool,
    /// Interval between SSE keep-alive comments, in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            client_ip_connection_limit: None,
            use_timestamp_for_id: true,
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

const fn default_keep_alive_secs() -> u64 {
    15
}

impl SessionSettings {
    /// Keep-alive interval.
    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Redaction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionSettings {
    /// Domain to page titles whose messages are redacted.
    #[serde(default)]
    pub rules: HashMap<String, Vec<Value>>,
    /// Log every applied redaction.
    #[serde(default = "default_true")]
    pub audit_log: bool,
}

impl Default for RedactionSettings {
    fn default() -> Self {
        Self {
            rules: HashMap::new(),
            audit_log: true,
        }
    }
}

/// Bus transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Per-topic channel capacity of the in-process bus.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Consumer settings passed through to the transport.
    #[serde(default)]
    pub consumer_config: Map<String, Value>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            consumer_config: Map::new(),
        }
    }
}

const fn default_channel_capacity() -> usize {
    1024
}

// =============================================================================
// Root
// =============================================================================

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerSettings,
    /// Stream configuration source.
    #[serde(default)]
    pub streams: StreamsSettings,
    /// Client session settings.
    #[serde(default)]
    pub session: SessionSettings,
    /// Redaction settings.
    #[serde(default)]
    pub redaction: RedactionSettings,
    /// Bus transport settings.
    #[serde(default)]
    pub transport: TransportSettings,
}

impl GatewayConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_string(),
            source: e,
        })?;

        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the YAML cannot be parsed or validated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate_env_vars(yaml);
        let config: Self = serde_yaml_bw::from_str(&interpolated)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == self.server.health_port {
            return Err(ConfigError::ValidationError(
                "server.port and server.health_port must be different".to_string(),
            ));
        }

        if self.transport.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "transport.channel_capacity must be positive".to_string(),
            ));
        }

        if self.session.client_ip_connection_limit == Some(0) {
            return Err(ConfigError::ValidationError(
                "session.client_ip_connection_limit must be positive when set".to_string(),
            ));
        }

        if self.streams.config_uri.is_none() && self.streams.static_streams.is_none() {
            return Err(ConfigError::ValidationError(
                "one of streams.config_uri or streams.static_streams must be set".to_string(),
            ));
        }

        if self.session.keep_alive_secs == 0 {
            return Err(ConfigError::ValidationError(
                "session.keep_alive_secs must be positive".to_string(),
            ));
        }

        if self.streams.fetch_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "streams.fetch_timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("config validation failed: {0}")]
    ValidationError(String),
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}`. Unset or empty variables
/// without a default become empty strings.
#[allow(clippy::expect_used)]
fn interpolate_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: OnceLock<Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("env var regex is valid")
    });

    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let default = caps.get(2).map_or("", |m| m.as_str());
        match std::env::var(&caps[1]) {
            Ok(value) if !value.is_empty() => value,
            _ => default.to_string(),
        }
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const MINIMAL: &str = r"
streams:
  config_uri: https://config.example/streams
";

    #[test]
    fn defaults_from_minimal_yaml() {
        let config = GatewayConfig::from_yaml(MINIMAL).unwrap();

        assert_eq!(config.server.interface, "0.0.0.0");
        assert_eq!(config.server.port, 8092);
        assert_eq!(config.server.health_port, 8093);
        assert_eq!(config.server.cors.as_deref(), Some("*"));
        assert_eq!(config.server.csp.as_deref(), Some(DEFAULT_CSP));
        assert!(config.server.ui_enabled);
        assert_eq!(config.streams.config_ttl_secs, 0);
        assert_eq!(config.streams.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.session.client_ip_connection_limit, None);
        assert!(config.session.use_timestamp_for_id);
        assert!(config.redaction.rules.is_empty());
        assert!(config.redaction.audit_log);
        assert_eq!(config.transport.channel_capacity, 1024);
    }

    #[test]
    fn full_yaml() {
        let yaml = r"
server:
  port: 9000
  health_port: 9001
  cors: null
streams:
  config_uri: file:///etc/streams.yaml
  config_object_path: streams.public
  config_ttl_secs: 60
  allowed_streams: [recentchange, page-create]
  schema_base_uris: [https://schema.example/repo]
  schema_latest_version: latest
  config_defaults:
    recentchange:
      description: Recent changes.
session:
  client_ip_connection_limit: 2
  use_timestamp_for_id: false
redaction:
  rules:
    en.wikipedia.org: [Some Title, 404, false]
transport:
  consumer_config:
    metadata.broker.list: localhost:9092
";
        let config = GatewayConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.cors, None);
        assert_eq!(config.streams.ttl(), Duration::from_secs(60));
        assert_eq!(
            config.streams.allowed_streams,
            Some(vec!["recentchange".to_string(), "page-create".to_string()])
        );
        assert_eq!(config.session.client_ip_connection_limit, Some(2));
        assert!(!config.session.use_timestamp_for_id);
        assert_eq!(config.redaction.rules["en.wikipedia.org"].len(), 3);
        assert_eq!(
            config.transport.consumer_config.get("metadata.broker.list"),
            Some(&Value::from("localhost:9092"))
        );

        let options = ResolverOptions::from(&config.streams);
        assert_eq!(options.object_path.as_deref(), Some("streams.public"));
        assert_eq!(options.schema_latest_version.as_deref(), Some("latest"));
        assert!(options.defaults.contains_key("recentchange"));
        assert!(!options.is_static());
    }

    #[test]
    fn static_streams_yaml() {
        let yaml = r"
streams:
  static_streams:
    test:
      topics: [test.topic]
";
        let config = GatewayConfig::from_yaml(yaml).unwrap();
        assert!(ResolverOptions::from(&config.streams).is_static());
    }

    #[test]
    fn rejects_same_ports() {
        let yaml = r"
server:
  port: 8000
  health_port: 8000
streams:
  config_uri: https://config.example/streams
";
        let err = GatewayConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("must be different"));
    }

    #[test]
    fn rejects_missing_stream_source() {
        let err = GatewayConfig::from_yaml("server:\n  port: 8000\n").unwrap_err();
        assert!(err.to_string().contains("streams.config_uri"));
    }

    #[test]
    fn rejects_zero_connection_limit() {
        let yaml = format!("{MINIMAL}session:\n  client_ip_connection_limit: 0\n");
        assert!(GatewayConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn rejects_zero_channel_capacity() {
        let yaml = format!("{MINIMAL}transport:\n  channel_capacity: 0\n");
        assert!(GatewayConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn invalid_yaml_is_parse_error() {
        let err = GatewayConfig::from_yaml("server: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = GatewayConfig::load(file.path().to_str()).unwrap();
        assert_eq!(
            config.streams.config_uri.as_deref(),
            Some("https://config.example/streams")
        );
    }

    #[test]
    fn example_config_is_valid() {
        let config =
            GatewayConfig::from_yaml(include_str!("../../../config.example.yaml")).unwrap();

        let streams = config.streams.static_streams.unwrap();
        assert!(streams.contains_key("mediawiki.recentchange"));
        assert_eq!(config.session.client_ip_connection_limit, Some(2));
        assert_eq!(config.redaction.rules["test.wikipedia.org"].len(), 1);
    }

    #[test]
    fn zero_keep_alive_rejected() {
        let yaml = format!("{MINIMAL}session:\n  keep_alive_secs: 0\n");
        let err = GatewayConfig::from_yaml(&yaml).unwrap_err();
        assert!(
            matches!(err, ConfigError::ValidationError(ref msg) if msg.contains("keep_alive_secs"))
        );
    }

    #[test]
    fn stale_after_tracks_ttl() {
        let mut streams = StreamsSettings::default();
        assert_eq!(streams.stale_after(), None);

        streams.config_ttl_secs = 60;
        assert_eq!(streams.stale_after(), Some(Duration::from_secs(180)));

        streams.config_ttl_secs = u64::MAX;
        assert_eq!(streams.stale_after(), Some(Duration::MAX));
    }

    #[test]
    fn load_missing_file_is_read_error() {
        let err = GatewayConfig::load(Some("/nonexistent/gateway.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn env_var_with_default_when_missing() {
        let input = "uri: ${GATEWAY_CONFIG_TEST_NONEXISTENT_VAR:-https://fallback}";
        assert_eq!(interpolate_env_vars(input), "uri: https://fallback");
    }

    #[test]
    fn env_var_without_default_becomes_empty() {
        let input = "key: ${GATEWAY_CONFIG_TEST_UNLIKELY_TO_EXIST}";
        assert_eq!(interpolate_env_vars(input), "key: ");
    }

    #[test]
    #[expect(clippy::literal_string_with_formatting_args)]
    fn env_var_uses_existing_value() {
        let result = interpolate_env_vars("path: ${PATH:-default}");
        assert_ne!(result, "path: default");
        assert!(result.starts_with("path: "));
    }
}
