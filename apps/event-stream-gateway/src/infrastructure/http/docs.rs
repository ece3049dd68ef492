//! Root and Documentation Routes
//!
//! - `GET /?spec` - current API description as JSON
//! - `GET /?doc` - HTML documentation rendered from the API description
//! - `GET /` - redirects to `/?doc`
//! - `GET /rc` - permanent redirect to `/?doc` for the retired endpoint
//! - `GET /robots.txt` - disallows all crawling

use std::fmt::Write as _;

use axum::Json;
use axum::extract::{RawQuery, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde_json::Value;

use super::error::ApiError;
use super::server::AppState;

const DOC_LOCATION: &str = "/?doc";

const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /\n";

/// Whether a raw query string carries `flag`, with or without a value.
#[must_use]
pub fn has_query_flag(query: Option<&str>, flag: &str) -> bool {
    query.is_some_and(|query| {
        query
            .split('&')
            .any(|pair| pair.split('=').next() == Some(flag))
    })
}

/// Handle `GET /`.
pub async fn root(State(state): State<AppState>, RawQuery(query): RawQuery) -> Response {
    let query = query.as_deref();

    if has_query_flag(query, "spec") {
        return Json(state.registry.api_description().as_ref().clone()).into_response();
    }

    if has_query_flag(query, "doc") {
        if !state.settings.ui_enabled {
            return ApiError::NotFound("documentation page is disabled".to_string())
                .into_response();
        }
        return Html(render_doc(&state.registry.api_description())).into_response();
    }

    Redirect::to(DOC_LOCATION).into_response()
}

/// Handle `GET /rc`.
pub async fn retired_rc() -> impl IntoResponse {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, DOC_LOCATION)],
    )
}

/// Handle `GET /robots.txt`.
pub async fn robots() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], ROBOTS_TXT)
}

// =============================================================================
// Rendering
// =============================================================================

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn text_at<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(Value::as_str).unwrap_or_default()
}

/// Render the API description as a static HTML page.
#[must_use]
pub fn render_doc(spec: &Value) -> String {
    let title = escape(text_at(spec, "/info/title"));
    let version = escape(text_at(spec, "/info/version"));

    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n</head>\n<body>\n<h1>{title} <small>{version}</small></h1>\n\
         <pre>{}</pre>\n<p><a href=\"/?spec\">API description (JSON)</a></p>\n",
        escape(text_at(spec, "/info/description"))
    );

    if let Some(paths) = spec.get("paths").and_then(Value::as_object) {
        for (path, route) in paths {
            let Some(get) = route.get("get") else {
                continue;
            };
            let _ = write!(
                html,
                "<section>\n<h2><code>GET {}</code></h2>\n<p><strong>{}</strong></p>\n\
                 <pre>{}</pre>\n",
                escape(path),
                escape(text_at(get, "/summary")),
                escape(text_at(get, "/description")),
            );

            if let Some(names) = get
                .pointer("/parameters/0/schema/items/enum")
                .and_then(Value::as_array)
            {
                html.push_str("<ul>\n");
                for name in names.iter().filter_map(Value::as_str) {
                    let name = escape(name);
                    let _ = writeln!(html, "<li><a href=\"/v2/stream/{name}\">{name}</a></li>");
                }
                html.push_str("</ul>\n");
            }
            html.push_str("</section>\n");
        }
    }

    html.push_str("</body>\n</html>\n");
    html
}
