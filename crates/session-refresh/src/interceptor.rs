//! Request interceptor
//!
//! Wraps a transport so every request carries the current access token and
//! expired-token failures go through the refresh coordinator. A request is
//! replayed at most once: whatever the replay returns is final, even another
//! expired-token 401.

use std::sync::Arc;

use tracing::debug;
use transport::{ApiRequest, ApiResponse, Transport};

use crate::coordinator::{Outcome, RefreshCoordinator};
use crate::error::{Error, Result};

pub struct RequestInterceptor {
    transport: Arc<dyn Transport>,
    coordinator: RefreshCoordinator,
}

impl RequestInterceptor {
    pub fn new(transport: Arc<dyn Transport>, coordinator: RefreshCoordinator) -> Self {
        Self {
            transport,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Send `request` with the stored access token.
    ///
    /// Without a session the request goes out unauthenticated and the
    /// upstream decides. Any Authorization header already on the request is
    /// replaced.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        if let Some(access_token) = self.coordinator.store().current_access_token().await {
            request.set_bearer(&access_token)?;
        }

        let error = match self.transport.send(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        match self.coordinator.handle_failure(&request, error).await {
            Outcome::Retry { access_token } => {
                debug!(method = %request.method, path = %request.path, "replaying request with refreshed token");
                request.set_bearer(&access_token)?;
                self.transport.send(request).await.map_err(Error::Transport)
            }
            Outcome::Propagate(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::SignOut;
    use crate::test_support::*;
    use reqwest::Method;
    use session_auth::{Credentials, MemoryTokenStore, TokenStore};
    use std::sync::atomic::Ordering;

    struct Harness {
        interceptor: Arc<RequestInterceptor>,
        transport: Arc<ScriptedTransport>,
        refresher: Arc<GatedRefresher>,
        sign_out: Arc<CountingSignOut>,
        store: Arc<CountingStore>,
    }

    fn harness(refresher: GatedRefresher) -> Harness {
        let transport = Arc::new(ScriptedTransport::accepting("at_new"));
        let store = Arc::new(CountingStore::new(Credentials::new("at_old", "rt_old")));
        let refresher = Arc::new(refresher);
        let sign_out = Arc::new(CountingSignOut::default());
        let coordinator =
            RefreshCoordinator::new(store.clone(), refresher.clone(), sign_out.clone());
        Harness {
            interceptor: Arc::new(RequestInterceptor::new(transport.clone(), coordinator)),
            transport,
            refresher,
            sign_out,
            store,
        }
    }

    fn get(path: &str) -> ApiRequest {
        ApiRequest::new(Method::GET, path)
    }

    #[tokio::test]
    async fn success_passes_through_without_refresh() {
        let transport = Arc::new(ScriptedTransport::accepting("at_old"));
        let store: Arc<dyn TokenStore> =
            Arc::new(MemoryTokenStore::with_credentials(Credentials::new("at_old", "rt_old")));
        let refresher = Arc::new(GatedRefresher::open(Ok(Credentials::new("x", "y"))));
        let coordinator = RefreshCoordinator::new(
            store,
            refresher.clone(),
            Arc::new(CountingSignOut::default()),
        );
        let interceptor = RequestInterceptor::new(transport.clone(), coordinator);

        let response = interceptor.send(get("/me")).await.unwrap();
        assert_eq!(response.body.as_ref(), b"/me");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            transport.log(),
            vec![("/me".to_string(), Some("at_old".to_string()))]
        );
    }

    #[tokio::test]
    async fn stamps_stored_token_over_caller_header() {
        let h = harness(GatedRefresher::open(Ok(Credentials::new("at_new", "rt_new"))));
        let mut request = get("/me");
        request.set_bearer("client_supplied").unwrap();

        h.interceptor.send(request).await.unwrap();

        let log = h.transport.log();
        assert_eq!(log[0].1.as_deref(), Some("at_old"));
        assert!(log.iter().all(|(_, b)| b.as_deref() != Some("client_supplied")));
    }

    #[tokio::test]
    async fn expired_request_is_replayed_once_with_new_token() {
        let h = harness(GatedRefresher::open(Ok(Credentials::new("at_new", "rt_new"))));

        let response = h.interceptor.send(get("/me")).await.unwrap();

        assert_eq!(response.body.as_ref(), b"/me");
        assert_eq!(
            h.transport.log(),
            vec![
                ("/me".to_string(), Some("at_old".to_string())),
                ("/me".to_string(), Some("at_new".to_string())),
            ]
        );
        assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queued_requests_replay_in_arrival_order() {
        let h = harness(GatedRefresher::closed(Ok(Credentials::new("at_new", "rt_new"))));

        let mut handles = Vec::new();
        for path in ["/a", "/b", "/c"] {
            let interceptor = h.interceptor.clone();
            handles.push(tokio::spawn(async move { interceptor.send(get(path)).await }));
            // Let each request reach the queue before the next one starts
            wait_for_waiters(h.interceptor.coordinator(), handles.len()).await;
        }

        h.refresher.release();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.transport.paths_sent_with("at_new"), vec!["/a", "/b", "/c"]);
    }

    #[tokio::test]
    async fn replay_failure_is_final() {
        let h = harness(GatedRefresher::open(Ok(Credentials::new("at_new", "rt_new"))));

        let err = h.interceptor.send(get("/always-expired")).await.unwrap_err();

        match err {
            Error::Transport(e) => assert_eq!(e.code(), Some("token.expired")),
            other => panic!("expected Transport, got {other:?}"),
        }
        // One original send, one replay, one refresh; no second round
        assert_eq!(h.transport.log().len(), 2);
        assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);
        assert!(!h.interceptor.coordinator().snapshot().await.in_flight);
    }

    #[tokio::test]
    async fn refresh_failure_reaches_every_queued_caller() {
        let h = harness(GatedRefresher::closed(Err(session_auth::Error::InvalidCredentials(
            "refresh token rejected (401 Unauthorized)".into(),
        ))));

        let mut handles = Vec::new();
        for path in ["/a", "/b"] {
            let interceptor = h.interceptor.clone();
            handles.push(tokio::spawn(async move { interceptor.send(get(path)).await }));
        }
        wait_for_waiters(h.interceptor.coordinator(), 2).await;
        h.refresher.release();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, Error::RefreshFailed(_)), "got: {err:?}");
        }
        // No replay happened
        assert!(h.transport.paths_sent_with("at_new").is_empty());
        assert_eq!(h.sign_out.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_token_signs_out_without_refresh() {
        let h = harness(GatedRefresher::open(Ok(Credentials::new("at_new", "rt_new"))));

        let err = h.interceptor.send(get("/invalid")).await.unwrap_err();

        assert!(matches!(err, Error::Unauthorized(_)), "got: {err:?}");
        assert_eq!(h.sign_out.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.transport.log().len(), 1);
    }

    #[tokio::test]
    async fn non_auth_failure_is_returned_unchanged() {
        let h = harness(GatedRefresher::open(Ok(Credentials::new("at_new", "rt_new"))));

        let err = h.interceptor.send(get("/down")).await.unwrap_err();

        match err {
            Error::Transport(e) => {
                assert_eq!(e.status(), Some(503));
                assert_eq!(e.response().unwrap().body.as_ref(), b"maintenance");
            }
            other => panic!("expected Transport, got {other:?}"),
        }
        assert_eq!(h.sign_out.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn signed_out_request_goes_out_without_bearer() {
        struct Noop;
        impl SignOut for Noop {
            fn sign_out(
                &self,
            ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
                Box::pin(async {})
            }
        }

        let transport = Arc::new(ScriptedTransport::accepting("at_new"));
        let coordinator = RefreshCoordinator::new(
            Arc::new(MemoryTokenStore::new()),
            Arc::new(GatedRefresher::open(Ok(Credentials::new("x", "y")))),
            Arc::new(Noop),
        );
        let interceptor = RequestInterceptor::new(transport.clone(), coordinator);

        let err = interceptor.send(get("/me")).await.unwrap_err();

        assert_eq!(transport.log()[0].1, None);
        assert!(matches!(err, Error::RefreshFailed(session_auth::Error::NotFound(_))));
    }
}
