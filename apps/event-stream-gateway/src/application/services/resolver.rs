//! Stream Configuration Resolver
//!
//! Fetches the raw stream configuration, filters and normalizes it, attaches
//! event schemas and expands aliases into a [`StreamTable`].
//!
//! # Pipeline
//!
//! 1. Fetch the raw document (or use static definitions), optionally
//!    descending into a dotted object path.
//! 2. Deep-merge configured defaults underneath the fetched values.
//! 3. Drop regex-keyed streams, streams without topics, and streams not on
//!    the allow-list.
//! 4. Default descriptions, synthesize and fetch schemas concurrently.
//! 5. Expand aliases into owned copies and sort by name.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{Map, Value};

use crate::application::ports::{ConfigSource, FetchError};
use crate::domain::stream::{REGEX_STREAM_MARKER, StreamConfig, StreamTable, default_description};

// =============================================================================
// Options
// =============================================================================

/// Where stream configuration comes from and how it is post-processed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolverOptions {
    /// URI of the stream configuration document.
    pub config_uri: Option<String>,
    /// Dotted path to the stream map inside the fetched document.
    pub object_path: Option<String>,
    /// Per-stream defaults, merged underneath fetched values.
    pub defaults: Map<String, Value>,
    /// If set, only these streams are exposed.
    pub allowed_streams: Option<Vec<String>>,
    /// Stream definitions given directly in configuration.
    pub static_streams: Option<Map<String, Value>>,
    /// Base URIs relative schema URIs are resolved against, in order.
    pub schema_base_uris: Vec<String>,
    /// Version used to synthesize schema URIs from schema titles.
    pub schema_latest_version: Option<String>,
}

impl ResolverOptions {
    /// Whether the stream set is fixed for the life of the process.
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.static_streams.is_some()
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Builds stream tables from configuration.
pub struct StreamConfigResolver {
    source: Arc<dyn ConfigSource>,
    options: ResolverOptions,
}

impl StreamConfigResolver {
    /// Create a resolver reading through `source`.
    #[must_use]
    pub fn new(source: Arc<dyn ConfigSource>, options: ResolverOptions) -> Self {
        Self { source, options }
    }

    /// Resolver options.
    #[must_use]
    pub const fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Load and resolve the stream table.
    ///
    /// Schema fetch failures are logged and leave the stream without a
    /// schema; they never fail the load.
    ///
    /// # Errors
    ///
    /// Returns `StreamConfigError` if no source is configured, the source
    /// cannot be fetched or does not hold a stream map, or no streams
    /// survive filtering.
    pub async fn load(&self) -> Result<StreamTable, StreamConfigError> {
        let mut raw = self.raw_streams().await?;
        defaults_deep(&mut raw, &self.options.defaults);

        let candidates: Vec<StreamConfig> = raw
            .into_iter()
            .filter_map(|(name, value)| self.candidate(name, value))
            .collect();

        let streams = join_all(candidates.into_iter().map(|s| self.attach_schema(s))).await;

        let table = expand_aliases(streams);
        if table.is_empty() {
            return Err(StreamConfigError::Empty);
        }

        tracing::info!(streams = table.len(), "Stream configuration resolved");
        Ok(table)
    }

    async fn raw_streams(&self) -> Result<Map<String, Value>, StreamConfigError> {
        if let Some(streams) = &self.options.static_streams {
            return Ok(streams.clone());
        }

        let uri = self
            .options
            .config_uri
            .as_deref()
            .ok_or(StreamConfigError::MissingSource)?;

        tracing::info!(uri, "Loading stream configs");
        let document = self
            .source
            .fetch(uri)
            .await
            .map_err(|source| StreamConfigError::Fetch {
                uri: uri.to_string(),
                source,
            })?;

        let document = match &self.options.object_path {
            Some(path) => value_at_path(&document, path)
                .cloned()
                .ok_or_else(|| StreamConfigError::MissingObjectPath(path.clone()))?,
            None => document,
        };

        match document {
            Value::Object(map) => Ok(map),
            other => Err(StreamConfigError::InvalidDocument(format!(
                "expected an object of stream configs, got {}",
                json_type(&other)
            ))),
        }
    }

    /// Apply the filters to one raw entry.
    fn candidate(&self, name: String, mut value: Value) -> Option<StreamConfig> {
        if name.starts_with(REGEX_STREAM_MARKER) {
            tracing::trace!(stream = %name, "Regex stream names are not supported, removing");
            return None;
        }

        if value.get("topics").is_none_or(Value::is_null) {
            tracing::trace!(stream = %name, "Stream has no configured topics, removing");
            return None;
        }

        if let Some(allowed) = &self.options.allowed_streams
            && !allowed.contains(&name)
        {
            tracing::trace!(stream = %name, "Stream is not in allowed_streams, removing");
            return None;
        }

        coerce_text_fields(&name, &mut value);

        let mut stream: StreamConfig = match serde_json::from_value(value) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(stream = %name, error = %e, "Invalid stream config, removing");
                return None;
            }
        };

        if stream.topics.is_empty() {
            tracing::trace!(stream = %name, "Stream has an empty topic list, removing");
            return None;
        }

        stream.name = name;
        if stream.description.is_none() {
            stream.description = Some(default_description(&stream.name));
        }
        Some(stream)
    }

    async fn attach_schema(&self, mut stream: StreamConfig) -> StreamConfig {
        if stream.schema.is_some() {
            return stream;
        }

        if stream.schema_uri.is_none()
            && !self.options.schema_base_uris.is_empty()
            && let (Some(title), Some(version)) = (
                stream.schema_title.as_deref(),
                self.options.schema_latest_version.as_deref(),
            )
        {
            stream.schema_uri = Some(format!("/{title}/{version}"));
        }

        let Some(uri) = stream.schema_uri.clone() else {
            return stream;
        };

        tracing::debug!(stream = %stream.name, schema = %uri, "Fetching schema");
        match self.fetch_first(&uri).await {
            Ok(schema) => stream.schema = Some(schema),
            Err(e) => tracing::warn!(
                stream = %stream.name,
                schema = %uri,
                error = %e,
                "Failed fetching schema, not augmenting API description with schema"
            ),
        }
        stream
    }

    /// Fetch `uri`, resolving it against each base URI in turn.
    async fn fetch_first(&self, uri: &str) -> Result<Value, FetchError> {
        let mut last_error = FetchError::UnsupportedUri(uri.to_string());
        for candidate in schema_candidates(uri, &self.options.schema_base_uris) {
            match self.source.fetch(&candidate).await {
                Ok(schema) => return Ok(schema),
                Err(e) => {
                    tracing::debug!(uri = %candidate, error = %e, "Schema candidate failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

/// Build the table with every alias expanded into an owned copy.
///
/// Neither canonical entries nor copies keep an alias list. Alias copies are
/// inserted after every canonical entry, so an alias named like a configured
/// stream always replaces it.
fn expand_aliases(streams: Vec<StreamConfig>) -> StreamTable {
    let mut canonical = Vec::with_capacity(streams.len());
    let mut copies = Vec::new();
    for mut stream in streams {
        let aliases = std::mem::take(&mut stream.aliases);
        copies.extend(aliases.iter().map(|alias| stream.alias_copy(alias)));
        canonical.push(stream);
    }

    let names: HashSet<&str> = canonical.iter().map(|s| s.name.as_str()).collect();
    for copy in &copies {
        if names.contains(copy.name.as_str()) {
            tracing::warn!(
                stream = %copy.name,
                alias_of = copy.alias_of.as_deref(),
                "Alias replaces a configured stream of the same name"
            );
        }
    }

    StreamTable::from_streams(canonical.into_iter().chain(copies))
}

/// Text fields that tolerate scalar values.
const TEXT_FIELDS: [&str; 2] = ["description", "schema_title"];

/// Stringify scalar `description` / `schema_title` values; structured ones
/// are dropped.
fn coerce_text_fields(name: &str, value: &mut Value) {
    let Some(map) = value.as_object_mut() else {
        return;
    };
    for field in TEXT_FIELDS {
        let Some(current) = map.get(field) else {
            continue;
        };
        let replacement = match current {
            Value::Number(n) => Some(Value::from(n.to_string())),
            Value::Bool(b) => Some(Value::from(b.to_string())),
            Value::Array(_) | Value::Object(_) => {
                tracing::warn!(stream = %name, field, "Ignoring non-text stream field");
                None
            }
            Value::String(_) | Value::Null => continue,
        };
        match replacement {
            Some(text) => {
                map.insert(field.to_string(), text);
            }
            None => {
                map.remove(field);
            }
        }
    }
}

/// Candidate URIs for a schema reference, in the order to try them.
fn schema_candidates(uri: &str, base_uris: &[String]) -> Vec<String> {
    if uri.contains("://") || base_uris.is_empty() {
        return vec![uri.to_string()];
    }
    base_uris
        .iter()
        .map(|base| format!("{}{uri}", base.trim_end_matches('/')))
        .collect()
}

// =============================================================================
// Helpers
// =============================================================================

/// Merge `defaults` into `target` without overwriting existing values.
///
/// Nested objects are merged recursively; any other existing value wins.
pub fn defaults_deep(target: &mut Map<String, Value>, defaults: &Map<String, Value>) {
    for (key, default) in defaults {
        match target.get_mut(key) {
            None => {
                target.insert(key.clone(), default.clone());
            }
            Some(Value::Object(existing)) => {
                if let Value::Object(default) = default {
                    defaults_deep(existing, default);
                }
            }
            Some(_) => {}
        }
    }
}

/// Look up a dotted path such as `streams.public`.
#[must_use]
pub fn value_at_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Stream configuration could not be resolved.
#[derive(Debug, thiserror::Error)]
pub enum StreamConfigError {
    /// Neither a config URI nor static streams are configured.
    #[error("must set streams.config_uri or streams.static_streams with the streams to expose")]
    MissingSource,

    /// Fetching the configuration document failed.
    #[error("failed to load stream configs from {uri}: {source}")]
    Fetch {
        /// Configuration URI.
        uri: String,
        /// Underlying fetch error.
        source: FetchError,
    },

    /// The configured object path is absent from the document.
    #[error("stream config object path '{0}' not found")]
    MissingObjectPath(String),

    /// The document does not hold a stream map.
    #[error("invalid stream config document: {0}")]
    InvalidDocument(String),

    /// No streams survived filtering.
    #[error("no streams configured after filtering")]
    Empty,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;
    use serde_json::json;

    use super::*;
    use crate::application::ports::MockConfigSource;

    fn options_with_uri() -> ResolverOptions {
        ResolverOptions {
            config_uri: Some("https://config.example/streams".to_string()),
            ..ResolverOptions::default()
        }
    }

    fn source_returning(document: Value) -> MockConfigSource {
        let mut source = MockConfigSource::new();
        source
            .expect_fetch()
            .with(eq("https://config.example/streams"))
            .returning(move |_| Ok(document.clone()));
        source
    }

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn missing_source_is_config_error() {
        let resolver =
            StreamConfigResolver::new(Arc::new(MockConfigSource::new()), ResolverOptions::default());
        let err = resolver.load().await.unwrap_err();
        assert!(matches!(err, StreamConfigError::MissingSource));
    }

    #[tokio::test]
    async fn filters_regex_topicless_and_disallowed_streams() {
        let source = source_returning(json!({
            "/^mediawiki\\..+/": { "topics": ["x"] },
            "no-topics": { "description": "nothing" },
            "allowed": { "topics": ["t1"] },
            "not-allowed": { "topics": ["t2"] }
        }));
        let options = ResolverOptions {
            allowed_streams: Some(vec!["allowed".to_string(), "no-topics".to_string()]),
            ..options_with_uri()
        };

        let table = StreamConfigResolver::new(Arc::new(source), options)
            .load()
            .await
            .unwrap();

        assert_eq!(table.names(), vec!["allowed"]);
    }

    #[tokio::test]
    async fn defaults_descriptions() {
        let source = source_returning(json!({
            "a": { "topics": ["t1"] },
            "b": { "topics": ["t2"], "description": "Custom." }
        }));
        let table = StreamConfigResolver::new(Arc::new(source), options_with_uri())
            .load()
            .await
            .unwrap();

        assert_eq!(table.get("a").unwrap().description.as_deref(), Some("a events."));
        assert_eq!(table.get("b").unwrap().description.as_deref(), Some("Custom."));
    }

    #[tokio::test]
    async fn reads_object_path() {
        let source = source_returning(json!({
            "config": { "streams": { "a": { "topics": ["t1"] } } }
        }));
        let options = ResolverOptions {
            object_path: Some("config.streams".to_string()),
            ..options_with_uri()
        };
        let table = StreamConfigResolver::new(Arc::new(source), options)
            .load()
            .await
            .unwrap();
        assert_eq!(table.names(), vec!["a"]);
    }

    #[tokio::test]
    async fn missing_object_path_fails() {
        let source = source_returning(json!({ "other": {} }));
        let options = ResolverOptions {
            object_path: Some("config.streams".to_string()),
            ..options_with_uri()
        };
        let err = StreamConfigResolver::new(Arc::new(source), options)
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, StreamConfigError::MissingObjectPath(_)));
    }

    #[tokio::test]
    async fn defaults_fill_gaps_without_overriding() {
        let source = source_returning(json!({
            "a": { "topics": ["t1"], "consumer": { "group": "fetched" } }
        }));
        let options = ResolverOptions {
            defaults: as_map(json!({
                "a": {
                    "topics": ["ignored"],
                    "description": "From defaults.",
                    "consumer": { "group": "default", "timeout": 5 }
                },
                "b": { "topics": ["t2"] }
            })),
            ..options_with_uri()
        };

        let table = StreamConfigResolver::new(Arc::new(source), options)
            .load()
            .await
            .unwrap();

        let a = table.get("a").unwrap();
        assert_eq!(a.topics, vec!["t1"]);
        assert_eq!(a.description.as_deref(), Some("From defaults."));
        assert_eq!(
            a.settings.get("consumer"),
            Some(&json!({ "group": "fetched", "timeout": 5 }))
        );
        assert_eq!(table.get("b").unwrap().topics, vec!["t2"]);
    }

    #[tokio::test]
    async fn expands_aliases_as_owned_copies() {
        let source = source_returning(json!({
            "recentchange": {
                "topics": ["eqiad.rc", "codfw.rc"],
                "stream_aliases": ["rc", "changes"]
            }
        }));
        let table = StreamConfigResolver::new(Arc::new(source), options_with_uri())
            .load()
            .await
            .unwrap();

        assert_eq!(table.names(), vec!["changes", "rc", "recentchange"]);

        let alias = table.get("rc").unwrap();
        assert_eq!(alias.topics, vec!["eqiad.rc", "codfw.rc"]);
        assert!(alias.aliases.is_empty());
        assert_eq!(
            alias.description.as_deref(),
            Some("recentchange events.\n\n(NOTE: This stream is an alias of recentchange)")
        );
        let canonical = table.get("recentchange").unwrap();
        assert!(canonical.aliases.is_empty());
        assert_eq!(canonical.alias_of, None);
    }

    #[tokio::test]
    async fn alias_entries_share_topics_and_carry_no_alias_list() {
        let source = source_returning(json!({
            "canonical": { "topics": ["t1"], "stream_aliases": ["alias1"] }
        }));
        let table = StreamConfigResolver::new(Arc::new(source), options_with_uri())
            .load()
            .await
            .unwrap();

        assert_eq!(table.names(), vec!["alias1", "canonical"]);
        for name in ["canonical", "alias1"] {
            let entry = serde_json::to_value(table.get(name).unwrap()).unwrap();
            assert_eq!(entry["topics"], json!(["t1"]));
            assert!(entry.get("aliases").is_none());
            assert!(entry.get("stream_aliases").is_none());
        }
        assert!(
            table
                .get("alias1")
                .unwrap()
                .description
                .as_deref()
                .unwrap()
                .contains("canonical")
        );
    }

    #[tokio::test]
    async fn alias_replaces_same_named_stream_regardless_of_order() {
        for owner in ["a", "z"] {
            let source = source_returning(json!({
                owner: { "topics": ["owner.topic"], "stream_aliases": ["m"] },
                "m": { "topics": ["m.topic"] }
            }));
            let table = StreamConfigResolver::new(Arc::new(source), options_with_uri())
                .load()
                .await
                .unwrap();

            let m = table.get("m").unwrap();
            assert_eq!(m.alias_of.as_deref(), Some(owner));
            assert_eq!(m.topics, vec!["owner.topic"]);
        }
    }

    #[tokio::test]
    async fn scalar_text_fields_are_stringified() {
        let source = source_returning(json!({
            "numbered": { "topics": ["t1"], "description": 42, "schema_title": true },
            "structured": { "topics": ["t2"], "description": { "text": "x" } }
        }));
        let table = StreamConfigResolver::new(Arc::new(source), options_with_uri())
            .load()
            .await
            .unwrap();

        let numbered = table.get("numbered").unwrap();
        assert_eq!(numbered.description.as_deref(), Some("42"));
        assert_eq!(numbered.schema_title.as_deref(), Some("true"));
        assert_eq!(
            table.get("structured").unwrap().description.as_deref(),
            Some("structured events.")
        );
    }

    #[tokio::test]
    async fn empty_table_is_error() {
        let source = source_returning(json!({ "/regex/": { "topics": ["t"] } }));
        let err = StreamConfigResolver::new(Arc::new(source), options_with_uri())
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, StreamConfigError::Empty));
    }

    #[tokio::test]
    async fn non_object_document_is_error() {
        let source = source_returning(json!(["not", "a", "map"]));
        let err = StreamConfigResolver::new(Arc::new(source), options_with_uri())
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, StreamConfigError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn fetch_failure_is_error() {
        let mut source = MockConfigSource::new();
        source.expect_fetch().returning(|uri| {
            Err(FetchError::Status {
                uri: uri.to_string(),
                status: 500,
            })
        });
        let err = StreamConfigResolver::new(Arc::new(source), options_with_uri())
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, StreamConfigError::Fetch { .. }));
    }

    #[tokio::test]
    async fn synthesizes_schema_uri_and_tries_bases_in_order() {
        let mut source = MockConfigSource::new();
        source
            .expect_fetch()
            .with(eq("https://config.example/streams"))
            .returning(|_| {
                Ok(json!({
                    "page-create": {
                        "topics": ["eqiad.page-create"],
                        "schema_title": "mediawiki/page/create"
                    }
                }))
            });
        source
            .expect_fetch()
            .with(eq("https://primary.example/mediawiki/page/create/latest"))
            .times(1)
            .returning(|uri| {
                Err(FetchError::Status {
                    uri: uri.to_string(),
                    status: 404,
                })
            });
        source
            .expect_fetch()
            .with(eq("https://secondary.example/mediawiki/page/create/latest"))
            .times(1)
            .returning(|_| Ok(json!({ "title": "mediawiki/page/create" })));

        let options = ResolverOptions {
            schema_base_uris: vec![
                "https://primary.example/".to_string(),
                "https://secondary.example".to_string(),
            ],
            schema_latest_version: Some("latest".to_string()),
            ..options_with_uri()
        };

        let table = StreamConfigResolver::new(Arc::new(source), options)
            .load()
            .await
            .unwrap();

        let stream = table.get("page-create").unwrap();
        assert_eq!(
            stream.schema_uri.as_deref(),
            Some("/mediawiki/page/create/latest")
        );
        assert_eq!(
            stream.schema,
            Some(json!({ "title": "mediawiki/page/create" }))
        );
    }

    #[tokio::test]
    async fn schema_failure_keeps_stream_without_schema() {
        let mut source = MockConfigSource::new();
        source
            .expect_fetch()
            .with(eq("https://config.example/streams"))
            .returning(|_| {
                Ok(json!({
                    "a": { "topics": ["t1"], "$schema": "https://schemas.example/a/1.0.0" },
                    "b": { "topics": ["t2"], "$schema": "https://schemas.example/b/1.0.0" }
                }))
            });
        source
            .expect_fetch()
            .with(eq("https://schemas.example/a/1.0.0"))
            .returning(|uri| {
                Err(FetchError::Request {
                    uri: uri.to_string(),
                    message: "connection refused".to_string(),
                })
            });
        source
            .expect_fetch()
            .with(eq("https://schemas.example/b/1.0.0"))
            .returning(|_| Ok(json!({ "title": "b" })));

        let table = StreamConfigResolver::new(Arc::new(source), options_with_uri())
            .load()
            .await
            .unwrap();

        assert_eq!(table.len(), 2);
        assert!(table.get("a").unwrap().schema.is_none());
        assert!(table.get("b").unwrap().schema.is_some());
    }

    #[tokio::test]
    async fn inline_schema_is_not_fetched() {
        let source = source_returning(json!({
            "a": { "topics": ["t1"], "$schema": "/a/1.0.0", "schema": { "title": "inline" } }
        }));
        let options = ResolverOptions {
            schema_base_uris: vec!["https://schemas.example".to_string()],
            ..options_with_uri()
        };
        let table = StreamConfigResolver::new(Arc::new(source), options)
            .load()
            .await
            .unwrap();
        assert_eq!(table.get("a").unwrap().schema, Some(json!({ "title": "inline" })));
    }

    #[tokio::test]
    async fn static_streams_skip_fetching() {
        let options = ResolverOptions {
            static_streams: Some(as_map(json!({ "a": { "topics": ["t1"] } }))),
            ..ResolverOptions::default()
        };
        let resolver = StreamConfigResolver::new(Arc::new(MockConfigSource::new()), options);
        assert!(resolver.options().is_static());
        assert_eq!(resolver.load().await.unwrap().names(), vec!["a"]);
    }

    #[test]
    fn schema_candidates_resolution() {
        let bases = vec!["https://a.example/".to_string(), "file:///schemas".to_string()];
        assert_eq!(
            schema_candidates("/x/1.0.0", &bases),
            vec!["https://a.example/x/1.0.0", "file:///schemas/x/1.0.0"]
        );
        assert_eq!(
            schema_candidates("https://abs.example/x", &bases),
            vec!["https://abs.example/x"]
        );
        assert_eq!(schema_candidates("/x/1.0.0", &[]), vec!["/x/1.0.0"]);
    }

    #[test]
    fn value_at_path_walks_objects_and_arrays() {
        let doc = json!({ "a": { "b": [ { "c": 1 } ] } });
        assert_eq!(value_at_path(&doc, "a.b.0.c"), Some(&json!(1)));
        assert_eq!(value_at_path(&doc, "a.x"), None);
    }
}
