//! Stream Endpoint
//!
//! `GET /v2/stream/{streams}`: admits the client, resolves the requested
//! streams to topics, opens the transport, and relays events as
//! Server-Sent Events until either side goes away.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Deserialize;

use super::error::ApiError;
use super::server::AppState;
use crate::application::ports::{ConsumeRequest, EventStream, TransportEvent};
use crate::application::services::{AuditContext, SessionGuard, TeardownReason};
use crate::domain::session::ClientSession;
use crate::domain::stream::parse_stream_list;
use crate::infrastructure::metrics;

/// Client IP header used for admission.
pub const CLIENT_IP_HEADER: &str = "x-client-ip";

/// Resume state header.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Query parameters of the stream endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Start time, as milliseconds since the epoch or a date.
    pub since: Option<String>,
}

/// Parse the `since` parameter into milliseconds since the epoch.
///
/// Accepts an integer or decimal millisecond count, an RFC 3339 or RFC 2822
/// date, or `YYYY-MM-DD` with an optional `THH:MM:SS` time read as UTC.
/// An empty value counts as absent.
///
/// # Errors
///
/// Returns `ApiError::InvalidTimestamp` if the value is none of those.
#[allow(clippy::cast_possible_truncation)]
pub fn parse_since(since: Option<&str>) -> Result<Option<i64>, ApiError> {
    let Some(raw) = since.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    if let Ok(millis) = raw.parse::<i64>() {
        return Ok(Some(millis));
    }

    if let Ok(millis) = raw.parse::<f64>()
        && millis.is_finite()
    {
        return Ok(Some(millis.trunc() as i64));
    }

    parse_date(raw)
        .map(|date| Some(date.timestamp_millis()))
        .ok_or_else(|| ApiError::InvalidTimestamp(since.unwrap_or_default().to_string()))
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(raw) {
        return Some(date.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Handle `GET /v2/stream/{streams}`.
///
/// # Errors
///
/// Returns `ApiError` when the client is refused admission, names an
/// unknown stream, sends an unparseable `since`, or the transport cannot
/// be opened. Admission taken before the failure is released.
pub async fn stream_events(
    State(state): State<AppState>,
    Path(streams): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let client_ip_header = header_str(&headers, CLIENT_IP_HEADER);

    let client_ip = state.admission.admit(client_ip_header).map_err(|e| {
        state.metrics.record_admission_rejected(e.reason());
        tracing::info!(client_ip = client_ip_header, reason = e.reason(), "Connection refused");
        ApiError::from(e)
    })?;

    let requested = parse_stream_list(&streams);
    let table = state.registry.table();
    let prepared = table
        .resolve_topics(&requested)
        .map_err(ApiError::from)
        .and_then(|topics| Ok((topics, parse_since(query.since.as_deref())?)));

    let (topics, at_timestamp) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            state.admission.release(&client_ip);
            return Err(e);
        }
    };

    let guard = SessionGuard::new(
        ClientSession::new(client_ip, requested, topics.clone()),
        Arc::clone(&state.admission),
        Arc::clone(&state.metrics),
    );

    let pipeline = state.pipeline.for_client(AuditContext {
        client_ip: client_ip_header.map(str::to_string),
        user_agent: header_str(&headers, "user-agent").map(str::to_string),
    });

    let request = ConsumeRequest {
        session_id: guard.session().id,
        allowed_topics: topics.clone(),
        topics,
        use_timestamp_for_id: state.settings.use_timestamp_for_id,
        last_event_id: header_str(&headers, LAST_EVENT_ID_HEADER).map(str::to_string),
        at_timestamp,
        consumer_config: state.settings.consumer_config.clone(),
        deserializer: Arc::new(pipeline),
    };

    let events = match state.transport.open(request).await {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(
                session_id = %guard.session().id,
                error = %e,
                "Failed to open transport"
            );
            guard.teardown(TeardownReason::Rejected);
            return Err(ApiError::from(e));
        }
    };

    guard.mark_connected();

    let body = SessionStream {
        events,
        guard: Some(guard),
    };
    Ok(Sse::new(body)
        .keep_alive(KeepAlive::new().interval(state.settings.keep_alive))
        .into_response())
}

/// SSE body of one session.
///
/// Ending the transport stream tears the session down as finished; dropping
/// the body (client disconnect) tears it down as closed.
struct SessionStream {
    events: EventStream,
    guard: Option<SessionGuard>,
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.events.poll_next_unpin(cx) {
            Poll::Ready(Some(event)) => {
                metrics::record_messages_delivered(1);
                Poll::Ready(Some(Ok(to_sse_event(&event))))
            }
            Poll::Ready(None) => {
                if let Some(guard) = this.guard.take() {
                    guard.teardown(TeardownReason::TransportFinished);
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

fn to_sse_event(event: &TransportEvent) -> Event {
    Event::default()
        .event("message")
        .id(event.id.as_str())
        .data(event.message.message.to_string())
}
