//! Fakes shared by the coordinator and interceptor tests

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use session_auth::{Credentials, MemoryTokenStore, Refresher, TokenStore};
use tokio::sync::watch;
use transport::{ApiRequest, ApiResponse, Transport, TransportError};

use crate::coordinator::{RefreshCoordinator, SignOut};

/// A non-2xx transport failure with `body` as the response body.
pub fn status_error(status: u16, body: &str) -> TransportError {
    TransportError::from_response(ApiResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers: HeaderMap::new(),
        body: Bytes::from(body.to_string()),
    })
}

/// Refresher whose calls block until the gate opens.
pub struct GatedRefresher {
    gate: watch::Sender<bool>,
    result: Mutex<session_auth::Result<Credentials>>,
    pub calls: AtomicUsize,
    last_token: Mutex<Option<String>>,
}

impl GatedRefresher {
    pub fn open(result: session_auth::Result<Credentials>) -> Self {
        Self::with_gate(true, result)
    }

    pub fn closed(result: session_auth::Result<Credentials>) -> Self {
        Self::with_gate(false, result)
    }

    fn with_gate(open: bool, result: session_auth::Result<Credentials>) -> Self {
        let (gate, _) = watch::channel(open);
        Self {
            gate,
            result: Mutex::new(result),
            calls: AtomicUsize::new(0),
            last_token: Mutex::new(None),
        }
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn set_result(&self, result: session_auth::Result<Credentials>) {
        *self.result.lock().unwrap() = result;
    }

    pub fn last_token(&self) -> Option<String> {
        self.last_token.lock().unwrap().clone()
    }
}

impl Refresher for GatedRefresher {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = session_auth::Result<Credentials>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_token.lock().unwrap() = Some(refresh_token.to_string());
            let mut gate = self.gate.subscribe();
            gate.wait_for(|open| *open).await.unwrap();
            self.result.lock().unwrap().clone()
        })
    }
}

/// Memory store that counts saves, optionally failing every one of them.
///
/// Reads can be held at a gate to simulate a slow store.
pub struct CountingStore {
    inner: MemoryTokenStore,
    fail_saves: AtomicBool,
    reads: watch::Sender<bool>,
    pub saves: AtomicUsize,
}

impl CountingStore {
    pub fn new(credentials: Credentials) -> Self {
        let (reads, _) = watch::channel(true);
        Self {
            inner: MemoryTokenStore::with_credentials(credentials),
            fail_saves: AtomicBool::new(false),
            reads,
            saves: AtomicUsize::new(0),
        }
    }

    pub fn failing(credentials: Credentials) -> Self {
        let store = Self::new(credentials);
        store.fail_saves.store(true, Ordering::SeqCst);
        store
    }

    /// Block `current()` until `release_reads` is called.
    pub fn hold_reads(&self) {
        self.reads.send_replace(false);
    }

    pub fn release_reads(&self) {
        self.reads.send_replace(true);
    }
}

impl TokenStore for CountingStore {
    fn current(&self) -> Pin<Box<dyn Future<Output = Option<Credentials>> + Send + '_>> {
        Box::pin(async move {
            let mut reads = self.reads.subscribe();
            reads.wait_for(|open| *open).await.unwrap();
            self.inner.current().await
        })
    }

    fn save(
        &self,
        credentials: Credentials,
    ) -> Pin<Box<dyn Future<Output = session_auth::Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(session_auth::Error::Io("disk full".into()));
            }
            self.inner.save(credentials).await
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = session_auth::Result<()>> + Send + '_>> {
        self.inner.clear()
    }

    fn save_if_current<'a>(
        &'a self,
        expected_refresh_token: &'a str,
        credentials: Credentials,
    ) -> Pin<Box<dyn Future<Output = session_auth::Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            self.saves.fetch_add(1, Ordering::SeqCst);
            // Memory is updated before the simulated disk write fails, like the file store
            let saved = self
                .inner
                .save_if_current(expected_refresh_token, credentials)
                .await?;
            if saved && self.fail_saves.load(Ordering::SeqCst) {
                return Err(session_auth::Error::Io("disk full".into()));
            }
            Ok(saved)
        })
    }
}

#[derive(Default)]
pub struct CountingSignOut {
    pub calls: AtomicUsize,
}

impl SignOut for CountingSignOut {
    fn sign_out(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
        })
    }
}

/// Upstream fake keyed on path and bearer token.
///
/// - `/invalid` → 401 `token.invalid`
/// - `/down` → 503
/// - `/always-expired` → 401 `token.expired` whatever the token
/// - anything else → 200 echoing the path when the bearer matches the
///   accepted token, 401 `token.expired` otherwise
pub struct ScriptedTransport {
    accepted: String,
    log: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedTransport {
    pub fn accepting(token: &str) -> Self {
        Self {
            accepted: token.to_string(),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Every request seen, as `(path, bearer)`, in arrival order.
    pub fn log(&self) -> Vec<(String, Option<String>)> {
        self.log.lock().unwrap().clone()
    }

    /// Paths of the requests that arrived carrying `token`.
    pub fn paths_sent_with(&self, token: &str) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|(_, bearer)| bearer.as_deref() == Some(token))
            .map(|(path, _)| path)
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = transport::Result<ApiResponse>> + Send + '_>> {
        Box::pin(async move {
            let bearer = request.bearer().map(str::to_owned);
            self.log
                .lock()
                .unwrap()
                .push((request.path.clone(), bearer.clone()));

            match request.path.as_str() {
                "/invalid" => Err(status_error(401, r#"{"error":true,"code":"token.invalid"}"#)),
                "/down" => Err(status_error(503, "maintenance")),
                "/always-expired" => {
                    Err(status_error(401, r#"{"error":true,"code":"token.expired"}"#))
                }
                path => {
                    if bearer.as_deref() == Some(self.accepted.as_str()) {
                        Ok(ApiResponse {
                            status: StatusCode::OK,
                            headers: HeaderMap::new(),
                            body: Bytes::from(path.to_string()),
                        })
                    } else {
                        Err(status_error(401, r#"{"error":true,"code":"token.expired"}"#))
                    }
                }
            }
        })
    }
}

/// Yield until `n` waiters are queued behind the in-flight refresh.
pub async fn wait_for_waiters(coordinator: &RefreshCoordinator, n: usize) {
    for _ in 0..1000 {
        if coordinator.snapshot().await.waiters >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("timed out waiting for {n} queued waiters");
}

/// Yield until no refresh is in flight.
pub async fn wait_for_idle(coordinator: &RefreshCoordinator) {
    for _ in 0..1000 {
        if !coordinator.snapshot().await.in_flight {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("timed out waiting for the refresh to settle");
}
