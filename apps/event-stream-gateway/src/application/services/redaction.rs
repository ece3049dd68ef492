//! Redaction Pipeline
//!
//! The per-message transform handed to the consumer transport: deserialize
//! the raw bus message, then apply the redaction policy. Each applied
//! redaction is counted and, when auditing is on, logged with the requesting
//! client's details.

use std::sync::Arc;

use crate::application::ports::{MessageDeserializer, MetricsRecorder};
use crate::domain::message::{BusMessage, DeserializationError, DeserializedMessage, deserialize};
use crate::domain::redaction::{RedactionOutcome, RedactionRuleSet, redact};

/// Requesting client details for audit logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditContext {
    /// Client IP, if known.
    pub client_ip: Option<String>,
    /// Client user agent, if known.
    pub user_agent: Option<String>,
}

/// Deserializes and redacts bus messages.
#[derive(Clone)]
pub struct RedactionPipeline {
    rules: Arc<RedactionRuleSet>,
    metrics: Arc<dyn MetricsRecorder>,
    audit_log: bool,
    context: AuditContext,
}

impl RedactionPipeline {
    /// Create a pipeline applying `rules`.
    #[must_use]
    pub fn new(rules: Arc<RedactionRuleSet>, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self {
            rules,
            metrics,
            audit_log: true,
            context: AuditContext::default(),
        }
    }

    /// Enable or disable audit logging of redactions.
    #[must_use]
    pub const fn with_audit_log(mut self, enabled: bool) -> Self {
        self.audit_log = enabled;
        self
    }

    /// Copy of this pipeline that attributes redactions to a client.
    #[must_use]
    pub fn for_client(&self, context: AuditContext) -> Self {
        Self {
            context,
            ..self.clone()
        }
    }

    /// Deserialize `raw` and redact it.
    ///
    /// # Errors
    ///
    /// Returns `DeserializationError` if the payload is unusable.
    pub fn transform(&self, raw: BusMessage) -> Result<DeserializedMessage, DeserializationError> {
        let mut message = deserialize(raw)?;
        if self.rules.is_empty() {
            return Ok(message);
        }

        if let Some(outcome) = redact(&mut message.message, &self.rules) {
            self.record(&outcome, &message.topic);
        }
        Ok(message)
    }

    fn record(&self, outcome: &RedactionOutcome, topic: &str) {
        let stream = outcome.stream.as_deref().unwrap_or(topic);
        self.metrics.record_redaction(stream);

        if self.audit_log {
            tracing::info!(
                redaction_case = outcome.case.as_str(),
                domain = %outcome.domain,
                stream = %stream,
                page_title = %outcome.page_title,
                client_ip = self.context.client_ip.as_deref(),
                user_agent = self.context.user_agent.as_deref(),
                "Redacted message"
            );
        }
    }
}

impl MessageDeserializer for RedactionPipeline {
    fn deserialize(&self, message: BusMessage) -> Result<DeserializedMessage, DeserializationError> {
        self.transform(message)
    }
}

impl std::fmt::Debug for RedactionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedactionPipeline")
            .field("domains", &self.rules.domain_count())
            .field("audit_log", &self.audit_log)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::ports::{MockMetricsRecorder, NoopMetrics};
    use crate::domain::message::Payload;

    fn rules() -> Arc<RedactionRuleSet> {
        Arc::new(RedactionRuleSet::new([("test.domain", ["redact"])]))
    }

    fn raw(document: serde_json::Value) -> BusMessage {
        BusMessage::new("eqiad.mediawiki.recentchange", 0, 7, Payload::Text(document.to_string()))
    }

    #[test]
    fn deserializes_and_redacts() {
        let mut metrics = MockMetricsRecorder::new();
        metrics
            .expect_record_redaction()
            .withf(|stream| stream == "mediawiki.recentchange")
            .times(1)
            .return_const(());

        let pipeline = RedactionPipeline::new(rules(), Arc::new(metrics)).for_client(AuditContext {
            client_ip: Some("1.1.1.1".to_string()),
            user_agent: Some("test-agent".to_string()),
        });

        let message = pipeline
            .transform(raw(json!({
                "meta": { "stream": "mediawiki.recentchange", "domain": "test.domain" },
                "title": "Redact",
                "user": { "user_text": "x" }
            })))
            .unwrap();

        assert!(message.message.get("user").is_none());
        assert_eq!(message.message["meta"]["offset"], 7);
    }

    #[test]
    fn passes_through_unmatched_messages() {
        let mut metrics = MockMetricsRecorder::new();
        metrics.expect_record_redaction().never();

        let pipeline = RedactionPipeline::new(rules(), Arc::new(metrics));
        let message = pipeline
            .transform(raw(json!({
                "meta": { "stream": "mediawiki.recentchange", "domain": "other.domain" },
                "title": "Redact",
                "user": { "user_text": "x" }
            })))
            .unwrap();

        assert_eq!(message.message["user"]["user_text"], "x");
    }

    #[test]
    fn empty_rules_only_deserialize() {
        let pipeline =
            RedactionPipeline::new(Arc::new(RedactionRuleSet::default()), Arc::new(NoopMetrics));
        let message = pipeline
            .transform(raw(json!({
                "meta": { "stream": "mediawiki.recentchange", "domain": "test.domain" },
                "title": "Redact",
                "user": {}
            })))
            .unwrap();
        assert!(message.message.get("user").is_some());
    }

    #[test]
    fn propagates_deserialization_errors() {
        let pipeline = RedactionPipeline::new(rules(), Arc::new(NoopMetrics)).with_audit_log(false);
        let err = MessageDeserializer::deserialize(
            &pipeline,
            BusMessage::new("t", 1, 2, Payload::Text("nope".to_string())),
        )
        .unwrap_err();
        assert_eq!(err.partition, 1);
        assert_eq!(err.offset, 2);
    }

    #[test]
    fn redaction_counted_under_topic_when_stream_missing() {
        let mut metrics = MockMetricsRecorder::new();
        metrics
            .expect_record_redaction()
            .withf(|stream| stream == "eqiad.mediawiki.recentchange")
            .times(1)
            .return_const(());

        let pipeline = RedactionPipeline::new(rules(), Arc::new(metrics));
        let message = pipeline
            .transform(raw(json!({
                "meta": { "domain": "test.domain" },
                "page_title": "redact",
                "performer": { "user_id": 1 }
            })))
            .unwrap();
        assert!(message.message.get("performer").is_none());
    }
}
