//! Bus Message Types
//!
//! Raw messages as handed over by a bus consumer, and their deserialized
//! form with transport metadata attached under `meta`.

use serde_json::{Map, Value};

/// Raw payload of a bus message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// UTF-8 encoded JSON bytes.
    Bytes(Vec<u8>),
    /// JSON text.
    Text(String),
    /// Already structured document.
    Json(Value),
}

/// A message as consumed from a bus topic.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    /// Topic the message was consumed from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Broker timestamp in milliseconds since the epoch, if known.
    pub timestamp: Option<i64>,
    /// Message key, if any.
    pub key: Option<Vec<u8>>,
    /// Message body.
    pub payload: Payload,
}

impl BusMessage {
    /// Create a keyless message without a timestamp.
    #[must_use]
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: Payload) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            timestamp: None,
            key: None,
            payload,
        }
    }

    /// Set the broker timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the message key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// A deserialized message plus the transport metadata it came with.
#[derive(Debug, Clone, PartialEq)]
pub struct DeserializedMessage {
    /// The message document, with transport metadata merged into `meta`.
    pub message: Value,
    /// Source topic.
    pub topic: String,
    /// Source partition.
    pub partition: i32,
    /// Source offset.
    pub offset: i64,
    /// Broker timestamp, if known.
    pub timestamp: Option<i64>,
    /// Message key as text, if present and non-empty.
    pub key: Option<String>,
}

/// The payload could not be turned into a JSON object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot deserialize message from {topic}[{partition}]@{offset}: {reason}")]
pub struct DeserializationError {
    /// Source topic.
    pub topic: String,
    /// Source partition.
    pub partition: i32,
    /// Source offset.
    pub offset: i64,
    /// What was wrong with the payload.
    pub reason: String,
}

/// Deserialize a bus message and attach its transport metadata.
///
/// Byte and text payloads are parsed as JSON; structured payloads are used
/// as is. The result must be a JSON object. `topic`, `partition`, `offset`
/// and a non-empty `key` are merged into `meta`, keeping whatever else
/// `meta` already held.
///
/// # Errors
///
/// Returns `DeserializationError` for invalid UTF-8, invalid JSON, or a
/// document that is not an object.
pub fn deserialize(raw: BusMessage) -> Result<DeserializedMessage, DeserializationError> {
    let BusMessage {
        topic,
        partition,
        offset,
        timestamp,
        key,
        payload,
    } = raw;

    let fail = |reason: String| DeserializationError {
        topic: topic.clone(),
        partition,
        offset,
        reason,
    };

    let document = match payload {
        Payload::Json(value) => value,
        Payload::Text(text) => {
            serde_json::from_str(&text).map_err(|e| fail(format!("invalid JSON: {e}")))?
        }
        Payload::Bytes(bytes) => {
            let text =
                String::from_utf8(bytes).map_err(|e| fail(format!("invalid UTF-8: {e}")))?;
            serde_json::from_str(&text).map_err(|e| fail(format!("invalid JSON: {e}")))?
        }
    };

    let Value::Object(mut message) = document else {
        return Err(fail("payload is not a JSON object".to_string()));
    };

    let key = key
        .filter(|k| !k.is_empty())
        .map(|k| String::from_utf8_lossy(&k).into_owned());

    let meta = message
        .entry("meta")
        .or_insert_with(|| Value::Object(Map::new()));
    if !meta.is_object() {
        *meta = Value::Object(Map::new());
    }
    if let Value::Object(meta) = meta {
        meta.insert("topic".to_string(), Value::from(topic.clone()));
        meta.insert("partition".to_string(), Value::from(partition));
        meta.insert("offset".to_string(), Value::from(offset));
        if let Some(key) = &key {
            meta.insert("key".to_string(), Value::from(key.clone()));
        }
    }

    Ok(DeserializedMessage {
        message: Value::Object(message),
        topic,
        partition,
        offset,
        timestamp,
        key,
    })
}
