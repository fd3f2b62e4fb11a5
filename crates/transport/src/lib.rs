//! Transport abstraction for authenticated upstream calls
//!
//! Defines the `Transport` trait that the refresh coordinator and request
//! interceptor drive. A transport executes one request and reports either the
//! upstream response or a `TransportError`. Non-2xx responses are failures;
//! the error keeps the full response so callers can classify it (status plus
//! the backend's `code` field) or pass it through verbatim.

pub mod http;

pub use http::HttpTransport;

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use std::future::Future;
use std::pin::Pin;

/// Everything needed to (re)issue a request against the upstream.
///
/// Cloning is cheap: the body is a refcounted `Bytes`. The interceptor keeps
/// a clone so the request can be replayed once with a fresh token.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path and query, appended to the transport's base URL
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Replace the Authorization header with `Bearer <access_token>`.
    ///
    /// The header value is marked sensitive so it never shows up in Debug
    /// output of the request.
    pub fn set_bearer(&mut self, access_token: &str) -> Result<()> {
        let mut value = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|e| TransportError::InvalidRequest(format!("invalid token value: {e}")))?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    /// The bearer token currently set on the request, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

/// A fully-read upstream response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Transport-level failure of a single request.
///
/// `Status` covers every non-2xx response. `code` is the backend-defined
/// error code read from the JSON body (`{"code": "token.expired"}`), parsed
/// once when the error is built.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("upstream returned {}", .response.status)]
    Status {
        response: ApiResponse,
        code: Option<String>,
    },

    #[error("upstream timed out: {0}")]
    Timeout(String),

    #[error("upstream request failed: {0}")]
    Connect(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Build a `Status` error from a non-2xx response.
    pub fn from_response(response: ApiResponse) -> Self {
        let code = backend_code(&response.body);
        Self::Status { response, code }
    }

    /// HTTP status of the failed response, if the upstream answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { response, .. } => Some(response.status.as_u16()),
            _ => None,
        }
    }

    /// Backend-defined error code from the response body.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Status { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// The failed response, when there is one.
    pub fn response(&self) -> Option<&ApiResponse> {
        match self {
            Self::Status { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Timeout(_) => "timeout",
            Self::Connect(_) => "connection",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Extract the top-level `code` string from a JSON error body.
pub fn backend_code(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get("code")?.as_str().map(str::to_owned)
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Executes requests against the upstream API.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Transport>`), so the interceptor and tests can swap
/// implementations freely.
pub trait Transport: Send + Sync {
    /// Send one request. 2xx responses are `Ok`; everything else is an error.
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &'static str) -> ApiResponse {
        ApiResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn status_error_exposes_status_and_code() {
        let err = TransportError::from_response(response(
            401,
            r#"{"error":true,"code":"token.expired","message":"Token expired."}"#,
        ));
        assert_eq!(err.status(), Some(401));
        assert_eq!(err.code(), Some("token.expired"));
        assert_eq!(err.kind(), "status");
    }

    #[test]
    fn non_json_body_has_no_code() {
        let err = TransportError::from_response(response(401, "Unauthorized"));
        assert_eq!(err.status(), Some(401));
        assert_eq!(err.code(), None);
    }

    #[test]
    fn non_string_code_is_ignored() {
        assert_eq!(backend_code(br#"{"code":401}"#), None);
        assert_eq!(backend_code(br#"{"error":{"code":"nested"}}"#), None);
    }

    #[test]
    fn network_errors_have_no_status() {
        let err = TransportError::Connect("connection refused".into());
        assert_eq!(err.status(), None);
        assert_eq!(err.code(), None);
        assert!(err.response().is_none());
        assert_eq!(TransportError::Timeout("60s".into()).kind(), "timeout");
    }

    #[test]
    fn set_bearer_replaces_existing_authorization() {
        let mut request = ApiRequest::new(Method::GET, "/me");
        request.set_bearer("at_old").unwrap();
        request.set_bearer("at_new").unwrap();

        assert_eq!(request.bearer(), Some("at_new"));
        assert_eq!(request.headers.get_all(AUTHORIZATION).iter().count(), 1);
    }

    #[test]
    fn bearer_is_hidden_from_debug_output() {
        let mut request = ApiRequest::new(Method::GET, "/me");
        request.set_bearer("at_secret").unwrap();
        let debug = format!("{request:?}");
        assert!(!debug.contains("at_secret"), "token leaked: {debug}");
    }

    #[test]
    fn set_bearer_rejects_control_characters() {
        let mut request = ApiRequest::new(Method::GET, "/me");
        let err = request.set_bearer("bad\ntoken").unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
        assert!(request.bearer().is_none());
    }
}
