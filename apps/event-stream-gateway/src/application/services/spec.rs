//! API Description Synchronizer
//!
//! Regenerates the per-stream routes of the OpenAPI description from a
//! stream table. Every sync starts from the pristine base document, so
//! streams removed by a refresh disappear from the description too.

use serde_json::{Map, Value};

use crate::domain::stream::{StreamConfig, StreamTable};

/// Wildcard route every per-stream route is templated from.
pub const STREAMS_ROUTE: &str = "/v2/stream/{streams}";

/// Media types a stream schema is attached to.
const RESPONSE_MEDIA_TYPES: [&str; 2] = ["application/json", "text/event-stream"];

/// Schema keywords that do not belong in an embedded API schema.
const STRIPPED_SCHEMA_KEYS: [&str; 3] = ["$schema", "$id", "examples"];

/// Builds API descriptions for stream tables.
#[derive(Debug, Clone)]
pub struct SpecSynchronizer {
    base: Value,
    version: String,
}

impl SpecSynchronizer {
    /// Create a synchronizer over a base description.
    #[must_use]
    pub fn new(base: Value) -> Self {
        Self {
            base,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// The unmodified base description.
    #[must_use]
    pub const fn base(&self) -> &Value {
        &self.base
    }

    /// Build the description for `table`.
    ///
    /// # Errors
    ///
    /// Returns `SpecError` if the base description lacks the wildcard
    /// stream route or its streams parameter.
    pub fn sync(&self, table: &StreamTable) -> Result<Value, SpecError> {
        let mut spec = self.base.clone();

        if let Some(info) = spec.get_mut("info").and_then(Value::as_object_mut) {
            info.insert("version".to_string(), Value::from(self.version.clone()));
        }

        let paths = spec
            .get_mut("paths")
            .and_then(Value::as_object_mut)
            .ok_or(SpecError::MissingWildcardRoute)?;

        let wildcard = paths
            .get_mut(STREAMS_ROUTE)
            .ok_or(SpecError::MissingWildcardRoute)?;

        let names: Vec<Value> = table.names().into_iter().map(Value::from).collect();
        let items = wildcard
            .pointer_mut("/get/parameters/0/schema/items")
            .and_then(Value::as_object_mut)
            .ok_or(SpecError::MissingStreamsParameter)?;
        items.insert("enum".to_string(), Value::Array(names));

        let mut template = wildcard.clone();
        if let Some(Value::Array(parameters)) = template.pointer_mut("/get/parameters")
            && !parameters.is_empty()
        {
            parameters.remove(0);
        }

        for stream in table {
            let route = stream_route(&template, stream)?;
            paths.insert(format!("/v2/stream/{}", stream.name), route);
        }

        Ok(spec)
    }
}

fn stream_route(template: &Value, stream: &StreamConfig) -> Result<Value, SpecError> {
    let mut route = template.clone();
    let get = object_at(&mut route, &["get"])
        .ok_or_else(|| SpecError::InvalidDocument("get operation is not an object".into()))?;

    get.insert(
        "summary".to_string(),
        Value::from(format!("{} events", stream.name)),
    );

    let mut description = stream.description_or_default();
    if let Some(title) = &stream.schema_title {
        description.push_str(&format!("\n\nSchema title: {title}"));
    }
    get.insert("description".to_string(), Value::from(description));

    let Some(schema) = &stream.schema else {
        return Ok(route);
    };

    let example = schema
        .get("examples")
        .and_then(Value::as_array)
        .and_then(|examples| examples.first())
        .cloned();
    let sanitized = sanitize_schema(schema);

    for media_type in RESPONSE_MEDIA_TYPES {
        let content = object_at(
            &mut route,
            &["get", "responses", "200", "content", media_type],
        )
        .ok_or_else(|| SpecError::InvalidDocument(format!("{media_type} response is not an object")))?;

        content.insert("schema".to_string(), sanitized.clone());
        if let Some(example) = &example {
            content.insert("example".to_string(), example.clone());
        }
    }

    Ok(route)
}

/// Copy of `schema` without the keywords that do not belong in an API
/// description.
#[must_use]
pub fn sanitize_schema(schema: &Value) -> Value {
    let mut sanitized = schema.clone();
    if let Some(object) = sanitized.as_object_mut() {
        for key in STRIPPED_SCHEMA_KEYS {
            object.remove(key);
        }
    }
    sanitized
}

/// Walk `path`, creating missing objects, and return the object at the end.
///
/// Returns `None` if a node on the way exists but is not an object.
fn object_at<'a>(value: &'a mut Value, path: &[&str]) -> Option<&'a mut Map<String, Value>> {
    path.iter()
        .try_fold(value, |current, key| {
            current
                .as_object_mut()
                .map(|map| map.entry(*key).or_insert_with(|| Value::Object(Map::new())))
        })?
        .as_object_mut()
}

/// The base description cannot be synchronized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    /// The wildcard stream route is missing.
    #[error("API description has no /v2/stream/{{streams}} route")]
    MissingWildcardRoute,

    /// The wildcard route has no streams parameter with an items schema.
    #[error("/v2/stream/{{streams}} has no streams parameter schema")]
    MissingStreamsParameter,

    /// Some other part of the document has an unexpected shape.
    #[error("invalid API description: {0}")]
    InvalidDocument(String),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn base() -> Value {
        json!({
            "openapi": "3.0.0",
            "info": { "title": "Streams", "version": "0.0.0" },
            "paths": {
                "/v2/stream/{streams}": {
                    "get": {
                        "summary": "Wildcard",
                        "parameters": [
                            {
                                "name": "streams",
                                "in": "path",
                                "schema": { "type": "array", "items": { "type": "string" } }
                            },
                            { "name": "since", "in": "query", "schema": { "type": "string" } }
                        ],
                        "responses": {
                            "200": {
                                "description": "Events",
                                "content": {
                                    "application/json": {},
                                    "text/event-stream": {}
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    fn table() -> StreamTable {
        let mut a = StreamConfig::new("a", vec!["t1".to_string()]);
        a.description = Some("Stream A.".to_string());
        a.schema_title = Some("test/a".to_string());
        a.schema = Some(json!({
            "$schema": "https://json-schema.org/draft-07/schema#",
            "$id": "/test/a/1.0.0",
            "title": "test/a",
            "type": "object",
            "examples": [{ "x": 1 }, { "x": 2 }]
        }));
        let b = StreamConfig::new("b", vec!["t2".to_string()]);
        StreamTable::from_streams(vec![a, b])
    }

    #[test]
    fn sets_enum_to_table_names() {
        let spec = SpecSynchronizer::new(base()).sync(&table()).unwrap();
        assert_eq!(
            spec["paths"][STREAMS_ROUTE]["get"]["parameters"][0]["schema"]["items"]["enum"],
            json!(["a", "b"])
        );
    }

    #[test]
    fn creates_one_route_per_stream_without_streams_parameter() {
        let spec = SpecSynchronizer::new(base()).sync(&table()).unwrap();
        let a = &spec["paths"]["/v2/stream/a"]["get"];

        assert_eq!(a["summary"], "a events");
        assert_eq!(a["description"], "Stream A.\n\nSchema title: test/a");
        assert_eq!(a["parameters"].as_array().unwrap().len(), 1);
        assert_eq!(a["parameters"][0]["name"], "since");

        let b = &spec["paths"]["/v2/stream/b"]["get"];
        assert_eq!(b["description"], "b events.");
    }

    #[test]
    fn attaches_sanitized_schema_and_first_example() {
        let spec = SpecSynchronizer::new(base()).sync(&table()).unwrap();
        for media_type in RESPONSE_MEDIA_TYPES {
            let content = &spec["paths"]["/v2/stream/a"]["get"]["responses"]["200"]["content"]
                [media_type];
            assert_eq!(
                content["schema"],
                json!({ "title": "test/a", "type": "object" })
            );
            assert_eq!(content["example"], json!({ "x": 1 }));
        }

        let b = &spec["paths"]["/v2/stream/b"]["get"]["responses"]["200"]["content"];
        assert!(b["application/json"].get("schema").is_none());
    }

    #[test]
    fn regenerates_from_pristine_base() {
        let sync = SpecSynchronizer::new(base());
        let first = sync.sync(&table()).unwrap();
        assert!(first["paths"].get("/v2/stream/a").is_some());

        let smaller = StreamTable::from_streams(vec![StreamConfig::new("c", vec!["t".into()])]);
        let second = sync.sync(&smaller).unwrap();

        assert!(second["paths"].get("/v2/stream/a").is_none());
        assert!(second["paths"].get("/v2/stream/c").is_some());
        assert_eq!(
            second["paths"][STREAMS_ROUTE]["get"]["parameters"][0]["schema"]["items"]["enum"],
            json!(["c"])
        );
        assert!(sync.base()["paths"].get("/v2/stream/c").is_none());
    }

    #[test]
    fn repeated_sync_on_same_table_is_stable() {
        fn path_keys(spec: &Value) -> Vec<String> {
            spec["paths"].as_object().unwrap().keys().cloned().collect()
        }

        let sync = SpecSynchronizer::new(base());
        let table = table();
        let once = sync.sync(&table).unwrap();
        let twice = sync.sync(&table).unwrap();

        let keys = path_keys(&twice);
        let unique: std::collections::BTreeSet<&String> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
        assert_eq!(path_keys(&once), keys);
        assert_eq!(
            unique.into_iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["/v2/stream/a", "/v2/stream/b", STREAMS_ROUTE]
        );
        assert_eq!(
            once["paths"][STREAMS_ROUTE]["get"]["parameters"][0]["schema"]["items"]["enum"],
            twice["paths"][STREAMS_ROUTE]["get"]["parameters"][0]["schema"]["items"]["enum"]
        );
        assert_eq!(once, twice);
    }

    #[test]
    fn sets_info_version() {
        let spec = SpecSynchronizer::new(base()).sync(&table()).unwrap();
        assert_eq!(spec["info"]["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn missing_wildcard_route_is_error() {
        let err = SpecSynchronizer::new(json!({ "paths": {} }))
            .sync(&table())
            .unwrap_err();
        assert_eq!(err, SpecError::MissingWildcardRoute);
    }

    #[test]
    fn missing_streams_parameter_is_error() {
        let base = json!({ "paths": { "/v2/stream/{streams}": { "get": { "parameters": [] } } } });
        let err = SpecSynchronizer::new(base).sync(&table()).unwrap_err();
        assert_eq!(err, SpecError::MissingStreamsParameter);
    }

    #[test]
    fn sanitize_keeps_non_object_schemas() {
        assert_eq!(sanitize_schema(&json!(true)), json!(true));
    }
}
