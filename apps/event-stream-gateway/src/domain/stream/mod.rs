//! Stream Configuration Types
//!
//! Domain types for named logical streams and the resolved stream table.
//!
//! # Design
//!
//! A stream is a curated set of bus topics exposed to clients under a
//! stable name. The table maps every exposed name (canonical streams and
//! their aliases) to an owned `StreamConfig`. A table is immutable once
//! built; a configuration refresh builds a new one and swaps it in whole.
//!
//! Topic resolution lives here too: a client request names one or more
//! streams, and the table turns those names into the deduplicated list of
//! topics the transport should consume.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Types
// =============================================================================

/// Configuration for a single exposed stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream name, unique within a table.
    #[serde(default)]
    pub name: String,
    /// Bus topics that make up the stream, in configured order.
    pub topics: Vec<String>,
    /// Human readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Title of the schema that events in this stream conform to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_title: Option<String>,
    /// URI of the event schema, absolute or relative to a schema base URI.
    #[serde(
        rename = "$schema",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub schema_uri: Option<String>,
    /// The event schema document, once fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    /// Additional names this stream is exposed under.
    #[serde(
        default,
        alias = "stream_aliases",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub aliases: Vec<String>,
    /// Canonical stream name when this entry is an alias copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias_of: Option<String>,
    /// Any other configured settings, carried through untouched.
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl StreamConfig {
    /// Create a stream with the given topics and no other settings.
    #[must_use]
    pub fn new(name: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            name: name.into(),
            topics,
            description: None,
            schema_title: None,
            schema_uri: None,
            schema: None,
            aliases: Vec::new(),
            alias_of: None,
            settings: Map::new(),
        }
    }

    /// Description, or the generated default when none is configured.
    #[must_use]
    pub fn description_or_default(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| default_description(&self.name))
    }

    /// Build the alias copy of this stream exposed under `alias`.
    ///
    /// The copy is fully owned, carries no aliases of its own and its
    /// description notes the canonical stream.
    #[must_use]
    pub fn alias_copy(&self, alias: &str) -> Self {
        let mut copy = self.clone();
        copy.name = alias.to_string();
        copy.aliases.clear();
        copy.alias_of = Some(self.name.clone());
        copy.description = Some(format!(
            "{}\n\n(NOTE: This stream is an alias of {})",
            self.description_or_default(),
            self.name
        ));
        copy
    }
}

/// Default description for a stream without one.
#[must_use]
pub fn default_description(name: &str) -> String {
    format!("{name} events.")
}

/// Prefix marking a stream name as a regex pattern rather than a literal.
pub const REGEX_STREAM_MARKER: char = '/';

// =============================================================================
// Stream Table
// =============================================================================

/// Resolved, immutable map from exposed stream name to configuration.
///
/// Iteration is always sorted by stream name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamTable {
    streams: BTreeMap<String, StreamConfig>,
}

impl StreamTable {
    /// Build a table from stream configs, keyed by their names.
    ///
    /// A later config with the same name replaces an earlier one.
    #[must_use]
    pub fn from_streams(streams: impl IntoIterator<Item = StreamConfig>) -> Self {
        Self {
            streams: streams
                .into_iter()
                .map(|stream| (stream.name.clone(), stream))
                .collect(),
        }
    }

    /// Look up a stream by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StreamConfig> {
        self.streams.get(name)
    }

    /// Whether the table exposes `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.streams.contains_key(name)
    }

    /// Exposed stream names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.streams.keys().map(String::as_str).collect()
    }

    /// Iterate streams in name order.
    pub fn iter(&self) -> impl Iterator<Item = &StreamConfig> {
        self.streams.values()
    }

    /// Number of exposed names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Resolve requested stream names into the topics to consume.
    ///
    /// The result is the concatenation of each stream's topics in request
    /// order, with later duplicates dropped.
    ///
    /// # Errors
    ///
    /// Returns `StreamNotFound` listing every requested name missing from
    /// the table, in request order.
    pub fn resolve_topics<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<String>, StreamNotFound> {
        let invalid: Vec<String> = names
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| !self.contains(name))
            .map(str::to_string)
            .collect();

        if !invalid.is_empty() {
            return Err(StreamNotFound { invalid });
        }

        let mut seen = HashSet::new();
        let topics = names
            .iter()
            .filter_map(|name| self.get(name.as_ref()))
            .flat_map(|stream| stream.topics.iter())
            .filter(|topic| seen.insert(topic.as_str()))
            .cloned()
            .collect();

        Ok(topics)
    }
}

impl<'a> IntoIterator for &'a StreamTable {
    type Item = &'a StreamConfig;
    type IntoIter = std::collections::btree_map::Values<'a, String, StreamConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.streams.values()
    }
}

/// Split a comma separated stream list as given in a request path.
#[must_use]
pub fn parse_stream_list(segment: &str) -> Vec<String> {
    segment.split(',').map(str::to_string).collect()
}

// =============================================================================
// Errors
// =============================================================================

/// One or more requested streams are not exposed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid streams: {}", .invalid.join(","))]
pub struct StreamNotFound {
    /// The unknown names, in request order.
    pub invalid: Vec<String>,
}

// =============================================================================
// Tests
// =============================================================================
