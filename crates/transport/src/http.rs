//! reqwest-backed transport
//!
//! Joins the request path onto a fixed upstream base URL, applies a
//! per-request timeout, and reads the whole response body. No retries: a
//! timeout or connection error is reported once and the caller decides.

use crate::{ApiRequest, ApiResponse, Result, Transport, TransportError};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Transport that forwards requests to a single upstream over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Absolute upstream URL for a request path (which may carry a query).
    pub fn url_for(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.is_empty() {
            base.to_string()
        } else if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + '_>> {
        Box::pin(async move {
            let url = self.url_for(&request.path);

            let upstream = self
                .client
                .request(request.method, &url)
                .headers(request.headers)
                .timeout(self.timeout)
                .body(request.body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        TransportError::Timeout(format!(
                            "no response after {}s: {e}",
                            self.timeout.as_secs()
                        ))
                    } else {
                        TransportError::Connect(e.to_string())
                    }
                })?;

            let status = upstream.status();
            let headers = upstream.headers().clone();
            let body = upstream.bytes().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(format!("reading upstream body: {e}"))
                } else {
                    TransportError::Connect(format!("reading upstream body: {e}"))
                }
            })?;

            let response = ApiResponse {
                status,
                headers,
                body,
            };

            if status.is_success() {
                return Ok(response);
            }

            let err = TransportError::from_response(response);
            debug!(status = status.as_u16(), code = ?err.code(), "upstream returned error status");
            Err(err)
        })
    }
}
