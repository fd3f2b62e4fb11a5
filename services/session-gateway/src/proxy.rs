//! HTTP proxy logic
//!
//! Receives inbound requests, strips hop-by-hop headers and any client
//! Authorization, and forwards them through the request interceptor, which
//! stamps the session's bearer token and handles expired-token refresh.
//! Upstream responses are returned verbatim, error statuses included.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::http::StatusCode;
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use axum::response::{IntoResponse, Response};
use session_refresh::{Error, RequestInterceptor};
use tracing::{error, info, instrument, warn};
use transport::{ApiRequest, ApiResponse, TransportError};

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Largest request body the gateway will buffer for a possible replay.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Client-facing message for a failed refresh. The backend's error text stays in the logs.
const REFRESH_FAILED_MESSAGE: &str = "session refresh failed, sign in again";

/// Request counters shared by the proxy handler and `/health`.
#[derive(Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    /// Requests currently being forwarded, reported when the drain times out
    pub in_flight: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

struct InFlight(Arc<AtomicU64>);

impl InFlight {
    fn enter(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Shared state passed to the proxy handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    pub interceptor: Arc<RequestInterceptor>,
    pub metrics: ServiceMetrics,
}

/// JSON error body for failures produced by the gateway itself:
/// `{"error":{"type":"...","message":"...","request_id":"req_..."}}`
fn error_response(status: StatusCode, error_type: &str, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Forward an inbound request upstream through the interceptor.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    let started = Instant::now();
    let _in_flight = InFlight::enter(&state.metrics.in_flight);
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut api_request = ApiRequest::new(method.clone(), path);
    for (name, value) in request.headers() {
        if forwardable(name.as_str()) {
            api_request.headers.append(name.clone(), value.clone());
        }
    }

    api_request.body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "failed to read request body");
            let response = error_response(
                StatusCode::BAD_REQUEST,
                "proxy_error",
                &format!("invalid request body: {e}"),
                &request_id,
            );
            crate::metrics::record_request(400, method.as_str(), started.elapsed().as_secs_f64());
            return response;
        }
    };

    let response = match state.interceptor.send(api_request).await {
        Ok(upstream) => upstream_response(upstream, &request_id),
        Err(e) => failure_response(state, e, &request_id),
    };

    crate::metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Map a terminal interceptor error to the client response.
fn failure_response(state: &ProxyState, err: Error, request_id: &str) -> Response {
    match err {
        // Upstream answered: hand its response back untouched
        Error::Transport(TransportError::Status { response, .. }) => {
            upstream_response(response, request_id)
        }
        Error::Unauthorized(e) => {
            info!(status = e.status(), "upstream rejected session, passing response through");
            match e.response() {
                Some(response) => upstream_response(response.clone(), request_id),
                None => error_response(
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    &e.to_string(),
                    request_id,
                ),
            }
        }
        Error::RefreshFailed(e) => {
            state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "session refresh failed");
            error_response(
                StatusCode::UNAUTHORIZED,
                "session_refresh_failed",
                REFRESH_FAILED_MESSAGE,
                request_id,
            )
        }
        Error::Transport(e) => {
            state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_upstream_error(e.kind());
            let status = match &e {
                TransportError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                TransportError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::BAD_GATEWAY,
            };
            error!(error = %e, status = status.as_u16(), "upstream request failed");
            error_response(status, "proxy_error", &e.to_string(), request_id)
        }
    }
}

/// Rebuild an upstream response for the client, minus hop-by-hop headers.
fn upstream_response(upstream: ApiResponse, request_id: &str) -> Response {
    let mut response = Response::builder().status(upstream.status);
    for (name, value) in &upstream.headers {
        if !is_hop_by_hop(name.as_str()) {
            response = response.header(name, value);
        }
    }
    response
        .body(axum::body::Body::from(upstream.body))
        .unwrap_or_else(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "proxy_error",
                &format!("response build error: {e}"),
                request_id,
            )
        })
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Whether a client header is sent upstream. The session supplies the
/// Authorization header; the transport sets Host and Content-Length.
fn forwardable(name: &str) -> bool {
    !is_hop_by_hop(name)
        && !name.eq_ignore_ascii_case(AUTHORIZATION.as_str())
        && !name.eq_ignore_ascii_case(HOST.as_str())
        && !name.eq_ignore_ascii_case(CONTENT_LENGTH.as_str())
}
