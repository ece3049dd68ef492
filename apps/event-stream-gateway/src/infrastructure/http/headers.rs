//! Response Header Policy
//!
//! CORS and browser security headers for every response, applied as
//! `tower_http` layers.

use axum::Router;
use axum::http::Method;
use axum::http::header::{self, HeaderName, HeaderValue};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::infrastructure::config::ServerSettings;

const ALLOWED_HEADERS: [HeaderName; 4] = [
    header::ACCEPT,
    header::CONTENT_TYPE,
    HeaderName::from_static("last-event-id"),
    HeaderName::from_static("x-client-ip"),
];

/// Header layers added to the router.
#[derive(Debug, Clone, Default)]
pub struct HeaderPolicy {
    cors: Option<CorsLayer>,
    security: Vec<(HeaderName, HeaderValue)>,
}

impl HeaderPolicy {
    /// Build the policy from server settings.
    ///
    /// Values that are not valid header values are skipped with a warning.
    #[must_use]
    pub fn from_settings(settings: &ServerSettings) -> Self {
        let cors = settings.cors.as_deref().and_then(cors_layer);

        let mut security = Vec::new();
        if let Some(csp) = settings.csp.as_deref() {
            push(&mut security, header::X_XSS_PROTECTION, "1; mode=block");
            push(&mut security, header::X_CONTENT_TYPE_OPTIONS, "nosniff");
            push(&mut security, header::X_FRAME_OPTIONS, "SAMEORIGIN");
            push(&mut security, header::CONTENT_SECURITY_POLICY, csp);
            push(
                &mut security,
                HeaderName::from_static("x-content-security-policy"),
                csp,
            );
            push(&mut security, HeaderName::from_static("x-webkit-csp"), csp);
        }

        Self { cors, security }
    }

    /// Whether CORS headers are added.
    #[must_use]
    pub const fn has_cors(&self) -> bool {
        self.cors.is_some()
    }

    /// Number of security headers added per response.
    #[must_use]
    pub fn security_len(&self) -> usize {
        self.security.len()
    }

    /// Whether the policy adds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cors.is_none() && self.security.is_empty()
    }

    /// Wrap `router` with the policy's layers.
    ///
    /// Headers already set by a handler are left untouched.
    #[must_use]
    pub fn apply<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let mut router = self
            .security
            .into_iter()
            .fold(router, |router, (name, value)| {
                router.layer(SetResponseHeaderLayer::if_not_present(name, value))
            });
        if let Some(cors) = self.cors {
            router = router.layer(cors);
        }
        router
    }
}

fn cors_layer(origin: &str) -> Option<CorsLayer> {
    let allow_origin = if origin == "*" {
        AllowOrigin::any()
    } else {
        match HeaderValue::from_str(origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(e) => {
                tracing::warn!(origin, error = %e, "Skipping invalid CORS origin");
                return None;
            }
        }
    };

    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET])
            .allow_headers(ALLOWED_HEADERS)
            .expose_headers([header::ETAG]),
    )
}

fn push(headers: &mut Vec<(HeaderName, HeaderValue)>, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => headers.push((name, value)),
        Err(e) => tracing::warn!(header = %name, error = %e, "Skipping invalid header value"),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, Response, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use tower::ServiceExt;

    use super::*;

    fn router(policy: HeaderPolicy) -> Router {
        let router = Router::new()
            .route("/", get(|| async { "ok" }))
            .route(
                "/framed",
                get(|| async { ([(header::X_FRAME_OPTIONS, "DENY")], "ok").into_response() }),
            );
        policy.apply(router)
    }

    async fn call(router: Router, request: Request<Body>) -> Response<Body> {
        router.oneshot(request).await.unwrap()
    }

    fn header_value<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
        response.headers().get(name).and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn defaults_add_cors_and_security_headers() {
        let policy = HeaderPolicy::from_settings(&ServerSettings::default());
        assert!(policy.has_cors());
        assert_eq!(policy.security_len(), 6);

        let request = Request::get("/")
            .header(header::ORIGIN, "https://example.org")
            .body(Body::empty())
            .unwrap();
        let response = call(router(policy), request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_value(&response, "access-control-allow-origin"), Some("*"));
        assert_eq!(header_value(&response, "access-control-expose-headers"), Some("etag"));
        assert_eq!(header_value(&response, "x-frame-options"), Some("SAMEORIGIN"));
        assert_eq!(header_value(&response, "x-content-type-options"), Some("nosniff"));
        assert!(header_value(&response, "x-webkit-csp").is_some());
        assert!(header_value(&response, "content-security-policy").is_some());
    }

    #[tokio::test]
    async fn handler_headers_take_precedence() {
        let policy = HeaderPolicy::from_settings(&ServerSettings::default());
        let request = Request::get("/framed").body(Body::empty()).unwrap();
        let response = call(router(policy), request).await;

        assert_eq!(header_value(&response, "x-frame-options"), Some("DENY"));
    }

    #[tokio::test]
    async fn preflight_allows_stream_request_headers() {
        let policy = HeaderPolicy::from_settings(&ServerSettings::default());
        let request = Request::options("/")
            .header(header::ORIGIN, "https://example.org")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "last-event-id")
            .body(Body::empty())
            .unwrap();
        let response = call(router(policy), request).await;

        assert_eq!(header_value(&response, "access-control-allow-origin"), Some("*"));
        let allowed = header_value(&response, "access-control-allow-headers").unwrap_or_default();
        assert!(allowed.contains("last-event-id"));
        assert!(allowed.contains("x-client-ip"));
    }

    #[tokio::test]
    async fn exact_origin_is_echoed() {
        let settings = ServerSettings {
            cors: Some("https://example.org".to_string()),
            csp: None,
            ..ServerSettings::default()
        };
        let request = Request::get("/").body(Body::empty()).unwrap();
        let response = call(router(HeaderPolicy::from_settings(&settings)), request).await;

        assert_eq!(
            header_value(&response, "access-control-allow-origin"),
            Some("https://example.org")
        );
        assert!(header_value(&response, "content-security-policy").is_none());
    }

    #[tokio::test]
    async fn disabled_cors_and_csp_add_nothing() {
        let settings = ServerSettings {
            cors: None,
            csp: None,
            ..ServerSettings::default()
        };
        let policy = HeaderPolicy::from_settings(&settings);
        assert!(policy.is_empty());

        let request = Request::get("/")
            .header(header::ORIGIN, "https://example.org")
            .body(Body::empty())
            .unwrap();
        let response = call(router(policy), request).await;
        assert!(header_value(&response, "access-control-allow-origin").is_none());
        assert!(header_value(&response, "x-frame-options").is_none());
    }

    #[test]
    fn invalid_values_are_skipped() {
        let settings = ServerSettings {
            cors: Some("bad\nvalue".to_string()),
            csp: Some("bad\ncsp".to_string()),
            ..ServerSettings::default()
        };
        let policy = HeaderPolicy::from_settings(&settings);
        assert!(!policy.has_cors());
        assert_eq!(policy.security_len(), 3);
    }
}
