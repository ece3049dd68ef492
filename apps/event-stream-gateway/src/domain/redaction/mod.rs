//! Message Redaction Policy
//!
//! Strips personally-identifying fields from selected message shapes before
//! delivery.
//!
//! # Design
//!
//! Messages are classified by `meta.stream` into a [`RedactionCase`], and
//! each case has its own pure transform. A message is only touched when its
//! `meta.domain` has configured rules and the case's title field,
//! normalized, is listed for that domain.
//!
//! Every field access is optional: a message missing `meta`, `page`,
//! `revision` or `prior_state` is simply left alone.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

/// Stream carrying page change events with performer and editor fragments.
pub const PAGE_CHANGE_V1_STREAM: &str = "mediawiki.page_change.v1";

/// Stream carrying recent change events with a user fragment.
pub const RECENT_CHANGE_STREAM: &str = "mediawiki.recentchange";

// =============================================================================
// Title Normalization
// =============================================================================

/// Normalize a page title for comparison.
///
/// Trims, collapses runs of whitespace into a single `_`, and lowercases.
///
/// ```
/// use event_stream_gateway::domain::redaction::normalize_title;
///
/// assert_eq!(normalize_title("  Redact   This "), "redact_this");
/// assert_eq!(normalize_title("Redact_This"), "redact_this");
/// ```
#[must_use]
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Title taken from a message.
///
/// Only JSON strings are titles; anything else never matches a rule.
fn message_title(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str)
}

/// Normalize a title taken from rule configuration.
///
/// Scalar entries are stringified first, so `404` and `false` in a rule
/// list match the titles `"404"` and `"false"`.
fn rule_title(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(normalize_title(s)),
        Value::Number(n) => Some(normalize_title(&n.to_string())),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

// =============================================================================
// Rule Set
// =============================================================================

/// Domain to normalized-title rules, normalized once at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedactionRuleSet {
    rules: HashMap<String, HashSet<String>>,
}

impl RedactionRuleSet {
    /// Build a rule set from string titles.
    #[must_use]
    pub fn new<D, T, I>(rules: impl IntoIterator<Item = (D, I)>) -> Self
    where
        D: Into<String>,
        T: AsRef<str>,
        I: IntoIterator<Item = T>,
    {
        Self {
            rules: rules
                .into_iter()
                .map(|(domain, titles)| {
                    let titles = titles
                        .into_iter()
                        .map(|t| normalize_title(t.as_ref()))
                        .collect();
                    (domain.into(), titles)
                })
                .collect(),
        }
    }

    /// Build a rule set from raw configuration values.
    ///
    /// Non-scalar entries are ignored.
    #[must_use]
    pub fn from_config(rules: &HashMap<String, Vec<Value>>) -> Self {
        Self {
            rules: rules
                .iter()
                .map(|(domain, titles)| {
                    (domain.clone(), titles.iter().filter_map(rule_title).collect())
                })
                .collect(),
        }
    }

    /// Whether no domain has rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of configured domains.
    #[must_use]
    pub fn domain_count(&self) -> usize {
        self.rules.len()
    }

    /// Whether `normalized_title` is listed for `domain`.
    #[must_use]
    pub fn matches(&self, domain: &str, normalized_title: &str) -> bool {
        self.rules
            .get(domain)
            .is_some_and(|titles| titles.contains(normalized_title))
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Message shape, keyed on `meta.stream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionCase {
    /// Page change events: blank `performer`, drop editors.
    PageChangeV1,
    /// Recent change events: drop `user`.
    RecentChange,
    /// Everything else: drop `performer`.
    Generic,
}

impl RedactionCase {
    /// Classify a message.
    #[must_use]
    pub fn classify(message: &Value) -> Self {
        match message.pointer("/meta/stream").and_then(Value::as_str) {
            Some(PAGE_CHANGE_V1_STREAM) => Self::PageChangeV1,
            Some(RECENT_CHANGE_STREAM) => Self::RecentChange,
            _ => Self::Generic,
        }
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PageChangeV1 => "page_change_v1",
            Self::RecentChange => "recentchange",
            Self::Generic => "generic",
        }
    }

    fn title(self, message: &Value) -> Option<&str> {
        match self {
            Self::PageChangeV1 => message_title(message.pointer("/page/page_title")),
            Self::RecentChange => message_title(message.get("title")),
            Self::Generic => message_title(message.get("page_title"))
                .or_else(|| message_title(message.pointer("/page/page_title"))),
        }
    }

    fn apply(self, message: &mut Map<String, Value>) {
        match self {
            Self::PageChangeV1 => redact_page_change(message),
            Self::RecentChange => redact_recent_change(message),
            Self::Generic => redact_generic(message),
        }
    }
}

/// The performer fragment must stay present; its sub-fields go.
fn redact_page_change(message: &mut Map<String, Value>) {
    message.insert("performer".to_string(), Value::Object(Map::new()));
    remove_editor(message.get_mut("revision"));
    remove_editor(
        message
            .get_mut("prior_state")
            .and_then(|prior| prior.get_mut("revision")),
    );
}

fn remove_editor(revision: Option<&mut Value>) {
    if let Some(Value::Object(revision)) = revision {
        revision.remove("editor");
    }
}

fn redact_recent_change(message: &mut Map<String, Value>) {
    message.remove("user");
}

fn redact_generic(message: &mut Map<String, Value>) {
    message.remove("performer");
}

// =============================================================================
// Redaction
// =============================================================================

/// Record of a redaction that was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionOutcome {
    /// Case that matched.
    pub case: RedactionCase,
    /// Message domain.
    pub domain: String,
    /// Message stream, if present.
    pub stream: Option<String>,
    /// Normalized title that matched a rule.
    pub title: String,
    /// Title as it appears in the message.
    pub page_title: String,
}

/// Redact `message` in place according to `rules`.
///
/// Returns what was redacted, or `None` if the message was left untouched.
pub fn redact(message: &mut Value, rules: &RedactionRuleSet) -> Option<RedactionOutcome> {
    let domain = message.pointer("/meta/domain").and_then(Value::as_str)?;
    let case = RedactionCase::classify(message);
    let page_title = case.title(message)?;
    let title = normalize_title(page_title);

    if !rules.matches(domain, &title) {
        return None;
    }

    let outcome = RedactionOutcome {
        case,
        domain: domain.to_string(),
        stream: message
            .pointer("/meta/stream")
            .and_then(Value::as_str)
            .map(str::to_string),
        title,
        page_title: page_title.to_string(),
    };

    case.apply(message.as_object_mut()?);
    Some(outcome)
}

// =============================================================================
// Tests
// =============================================================================
