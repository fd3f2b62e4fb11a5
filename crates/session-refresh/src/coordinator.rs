//! Refresh coordinator
//!
//! Turns many concurrent expired-token failures into one refresh call. The
//! flag and waiter queue live in a single `RefreshState` behind one tokio
//! Mutex, so "check in-flight, then start or enqueue" is atomic.
//!
//! The refresh itself runs on a spawned task. A caller that times out or is
//! dropped while waiting cannot cancel it: the refresh always runs to
//! completion and always drains the queue, and a waiter whose receiver is
//! gone simply has its late result discarded.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use session_auth::{Credentials, Refresher, TokenStore};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};
use transport::{ApiRequest, TransportError};

use crate::classify::{FailureClass, classify};
use crate::error::Error;
use crate::state::{Join, RefreshSnapshot, RefreshState, Resolution};

/// Collaborator notified when a 401 is not an expired-token case.
///
/// Implementations clear session state; the coordinator only awaits the
/// notification before propagating the original error.
pub trait SignOut: Send + Sync {
    fn sign_out(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// What the caller should do with a failed request.
#[derive(Debug)]
pub enum Outcome {
    /// Replay the request once with this access token.
    Retry { access_token: String },
    /// Give up and surface this error.
    Propagate(Error),
}

struct Inner {
    state: Mutex<RefreshState>,
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn Refresher>,
    sign_out: Arc<dyn SignOut>,
}

/// Shared handle to the refresh coordinator. Cheap to clone.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        refresher: Arc<dyn Refresher>,
        sign_out: Arc<dyn SignOut>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RefreshState::new()),
                store,
                refresher,
                sign_out,
            }),
        }
    }

    /// The token store this coordinator refreshes into.
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.inner.store
    }

    /// Decide what happens to `request`, which failed with `error`.
    ///
    /// - Not a 401: `Propagate(Transport)`, no side effects
    /// - 401 without `token.expired`: sign out, `Propagate(Unauthorized)`
    /// - Expired token: start or join the refresh episode and wait for it;
    ///   `Retry` with the new access token or `Propagate(RefreshFailed)`
    ///
    /// If the request carried a token that the store has already replaced
    /// and no refresh is running, the expiry is stale: the caller gets
    /// `Retry` with the current token and no refresh is started.
    pub async fn handle_failure(&self, request: &ApiRequest, error: TransportError) -> Outcome {
        match classify(&error) {
            FailureClass::Other => Outcome::Propagate(Error::Transport(error)),
            FailureClass::Unauthorized => {
                warn!(
                    status = error.status(),
                    code = ?error.code(),
                    path = %request.path,
                    "unauthorized without expired-token code, signing out"
                );
                self.inner.sign_out.sign_out().await;
                Outcome::Propagate(Error::Unauthorized(error))
            }
            FailureClass::Expired => self.await_refresh(request.bearer()).await,
        }
    }

    /// Current flag, queue length, and episode count.
    pub async fn snapshot(&self) -> RefreshSnapshot {
        self.inner.state.lock().await.snapshot()
    }

    async fn await_refresh(&self, sent_token: Option<&str>) -> Outcome {
        let (tx, rx) = oneshot::channel();

        // Read outside the state lock; the store may be slow.
        let current = match sent_token {
            Some(_) => self.inner.store.current_access_token().await,
            None => None,
        };

        {
            let mut state = self.inner.state.lock().await;

            if !state.is_in_flight()
                && let Some(sent) = sent_token
                && let Some(current) = current
                && current != sent
            {
                debug!("request carried a superseded token, replaying with current token");
                return Outcome::Retry {
                    access_token: current,
                };
            }

            match state.begin_or_join(tx) {
                Join::Started { episode } => {
                    info!(episode, "access token expired, starting refresh");
                    tokio::spawn(run_refresh(self.inner.clone(), episode));
                }
                Join::Joined { episode, position } => {
                    debug!(episode, position, "refresh in flight, request queued");
                    metrics::counter!("session_refresh_waiters_total").increment(1);
                }
            }
        }

        match rx.await {
            Ok(Ok(access_token)) => Outcome::Retry { access_token },
            Ok(Err(e)) => Outcome::Propagate(Error::RefreshFailed(e)),
            // Only reachable if the refresh task is torn down with the runtime
            Err(_) => Outcome::Propagate(Error::RefreshFailed(session_auth::Error::Refresh(
                "refresh task ended before settling".into(),
            ))),
        }
    }
}

/// Run one refresh episode to completion and settle it.
async fn run_refresh(inner: Arc<Inner>, episode: u64) {
    let started = Instant::now();

    let resolution: Resolution = match inner.store.current_refresh_token().await {
        Some(refresh_token) => match inner.refresher.refresh(&refresh_token).await {
            Ok(credentials) => settle_refreshed(&inner, episode, &refresh_token, credentials).await,
            Err(e) => Err(e),
        },
        None => Err(session_auth::Error::NotFound(
            "no refresh token in session store".into(),
        )),
    };

    let resolution = match resolution {
        Ok(access_token) => {
            info!(episode, "token refresh succeeded");
            metrics::counter!("session_refresh_total", "outcome" => "success").increment(1);
            Ok(access_token)
        }
        Err(e @ session_auth::Error::SessionChanged(_)) => {
            warn!(episode, error = %e, "discarding refreshed credentials");
            metrics::counter!("session_refresh_total", "outcome" => "discarded").increment(1);
            Err(e)
        }
        Err(e) => {
            warn!(episode, error = %e, "token refresh failed, rejecting queued requests");
            metrics::counter!("session_refresh_total", "outcome" => "failure").increment(1);
            Err(e)
        }
    };

    metrics::histogram!("session_refresh_duration_seconds")
        .record(started.elapsed().as_secs_f64());

    let waiters = inner.state.lock().await.settle();
    let total = waiters.len();
    let mut abandoned = 0usize;
    for waiter in waiters {
        if waiter.send(resolution.clone()).is_err() {
            abandoned += 1;
        }
    }
    debug!(episode, total, abandoned, "refresh episode settled");
}

/// Store a refreshed pair unless the session was signed out or replaced
/// since the episode read `refresh_token`.
async fn settle_refreshed(
    inner: &Inner,
    episode: u64,
    refresh_token: &str,
    credentials: Credentials,
) -> Resolution {
    let access_token = credentials.access_token().to_string();
    match inner.store.save_if_current(refresh_token, credentials).await {
        Ok(true) => Ok(access_token),
        Ok(false) => Err(session_auth::Error::SessionChanged(
            "session was signed out or replaced while refreshing".into(),
        )),
        Err(e) => {
            // The pair is valid either way; waiters still get the token.
            warn!(episode, error = %e, "failed to persist refreshed credentials");
            Ok(access_token)
        }
    }
}
