//! In-Process Message Bus
//!
//! A topic-keyed fan-out bus built on tokio broadcast channels. It implements
//! the `ConsumerTransport` port so sessions can consume topics exactly as
//! they would from an external broker, minus replay.
//!
//! The binary starts with no producer attached: messages reach sessions only
//! through [`InMemoryBus::publish`], called by an embedding process or by
//! tests. A broker-backed deployment replaces the bus with another
//! `ConsumerTransport` implementation in `AppState::transport`.
//!
//! # Architecture
//!
//! Each topic gets its own broadcast channel on first use. Opening a session
//! subscribes to every requested topic and spawns one forwarding task per
//! topic; the tasks feed a single bounded channel that backs the session's
//! event stream. The stream ends when every forwarding task has finished,
//! which happens when the bus is closed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use crate::application::ports::{
    ConsumeRequest, ConsumerTransport, EventStream, MessageDeserializer, TransportError,
    TransportEvent,
};
use crate::domain::message::BusMessage;
use crate::domain::session::SessionId;
use crate::infrastructure::metrics;

// =============================================================================
// Event Positions
// =============================================================================

/// Position reached in one topic partition, as sent in SSE event ids.
///
/// Offsets point at the next message to read; timestamps are the broker
/// timestamp of the last message delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPosition {
    /// Topic name.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Next offset to read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    /// Timestamp of the last delivered message, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl EventPosition {
    /// Position after `message`.
    ///
    /// Uses the message timestamp when requested and available, the offset
    /// otherwise.
    #[must_use]
    pub fn after(message: &BusMessage, use_timestamp: bool) -> Self {
        let timestamp = message.timestamp.filter(|_| use_timestamp);
        Self {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: timestamp.is_none().then_some(message.offset + 1),
            timestamp,
        }
    }
}

/// Parse a `Last-Event-ID` value and check it only names allowed topics.
///
/// # Errors
///
/// Returns `TransportError::InvalidResumeState` if the value is not a JSON
/// array of positions or refers to a topic outside `allowed_topics`.
pub fn parse_resume_state(
    last_event_id: &str,
    allowed_topics: &[String],
) -> Result<Vec<EventPosition>, TransportError> {
    let positions: Vec<EventPosition> = serde_json::from_str(last_event_id)
        .map_err(|e| TransportError::InvalidResumeState(e.to_string()))?;

    if let Some(position) = positions
        .iter()
        .find(|p| !allowed_topics.contains(&p.topic))
    {
        return Err(TransportError::InvalidResumeState(format!(
            "topic {} is not part of the requested streams",
            position.topic
        )));
    }
    Ok(positions)
}

/// Latest positions of one session, keyed by topic partition.
#[derive(Debug, Default)]
struct PositionTracker {
    positions: Mutex<BTreeMap<(String, i32), EventPosition>>,
}

impl PositionTracker {
    /// Record `message` and return the event id covering every partition
    /// seen so far.
    fn advance(&self, message: &BusMessage, use_timestamp: bool) -> String {
        let position = EventPosition::after(message, use_timestamp);
        let mut positions = self.positions.lock();
        positions.insert((position.topic.clone(), position.partition), position);

        let current: Vec<&EventPosition> = positions.values().collect();
        serde_json::to_string(&current).unwrap_or_else(|_| "[]".to_string())
    }
}

// =============================================================================
// Bus
// =============================================================================

/// Default per-session buffer between forwarding tasks and the client.
const SESSION_BUFFER: usize = 256;

/// Topic-keyed broadcast bus.
#[derive(Debug)]
pub struct InMemoryBus {
    capacity: usize,
    topics: RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
    closed: AtomicBool,
}

/// Shared bus reference.
pub type SharedBus = Arc<InMemoryBus>;

impl InMemoryBus {
    /// Create a bus whose topic channels hold `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        if let Some(tx) = self.topics.read().get(topic) {
            return tx.clone();
        }
        self.topics
            .write()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish a message to its topic.
    ///
    /// Returns the number of subscribers that received it. Messages published
    /// with no subscribers, or after [`close`](Self::close), are dropped.
    pub fn publish(&self, message: BusMessage) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.sender(&message.topic).send(message).unwrap_or(0)
    }

    /// Number of active subscribers on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Close the bus; every open session stream finishes.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.topics.write().clear();
        tracing::info!("Message bus closed");
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ConsumerTransport for InMemoryBus {
    async fn open(&self, request: ConsumeRequest) -> Result<EventStream, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Unavailable("message bus is closed".to_string()));
        }

        if let Some(last_event_id) = request.last_event_id.as_deref() {
            let positions = parse_resume_state(last_event_id, &request.allowed_topics)?;
            tracing::debug!(
                session_id = %request.session_id,
                positions = positions.len(),
                "Resume state accepted; in-process bus delivers live messages only"
            );
        } else if let Some(at_timestamp) = request.at_timestamp {
            tracing::debug!(
                session_id = %request.session_id,
                at_timestamp,
                "Start timestamp accepted; in-process bus delivers live messages only"
            );
        }

        let (tx, rx) = mpsc::channel(SESSION_BUFFER);
        let tracker = Arc::new(PositionTracker::default());

        for topic in &request.topics {
            let consumer = TopicConsumer {
                session_id: request.session_id,
                rx: self.sender(topic).subscribe(),
                tx: tx.clone(),
                tracker: Arc::clone(&tracker),
                deserializer: Arc::clone(&request.deserializer),
                use_timestamp_for_id: request.use_timestamp_for_id,
            };
            tokio::spawn(consumer.run());
        }

        tracing::debug!(
            session_id = %request.session_id,
            topics = ?request.topics,
            "Bus consumer opened"
        );

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Forwards one topic of one session.
struct TopicConsumer {
    session_id: SessionId,
    rx: broadcast::Receiver<BusMessage>,
    tx: mpsc::Sender<TransportEvent>,
    tracker: Arc<PositionTracker>,
    deserializer: Arc<dyn MessageDeserializer>,
    use_timestamp_for_id: bool,
}

impl TopicConsumer {
    async fn run(mut self) {
        loop {
            let received = tokio::select! {
                () = self.tx.closed() => break,
                received = self.rx.recv() => received,
            };

            match received {
                Ok(raw) => {
                    let id = self.tracker.advance(&raw, self.use_timestamp_for_id);
                    match self.deserializer.deserialize(raw) {
                        Ok(message) => {
                            if self.tx.send(TransportEvent { id, message }).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            metrics::record_deserialization_failure(&e.topic);
                            tracing::warn!(
                                session_id = %self.session_id,
                                error = %e,
                                "Skipping undeserializable message"
                            );
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        session_id = %self.session_id,
                        lagged = n,
                        "Bus consumer lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
