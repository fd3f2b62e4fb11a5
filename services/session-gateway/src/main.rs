//! Session Gateway
//!
//! Single-binary service that:
//! 1. Holds one signed-in API session (access + refresh token)
//! 2. Listens for incoming requests
//! 3. Forwards them upstream with the session's bearer token
//! 4. Refreshes an expired access token once for all concurrent requests,
//!    then replays each of them with the new token

mod admin;
mod config;
mod metrics;
mod proxy;
mod session;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use session_auth::{FileTokenStore, HttpRefresher, MemoryTokenStore, TokenStore};
use session_refresh::{RefreshCoordinator, RequestInterceptor};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::HttpTransport;

use crate::admin::AdminState;
use crate::config::Config;
use crate::proxy::{ProxyState, ServiceMetrics};
use crate::session::ClearSession;

/// How long in-flight requests may take to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    prometheus: PrometheusHandle,
}

/// Build the gateway router.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(proxy_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Open the configured token store: file-backed when a path is set,
/// in-memory otherwise.
async fn open_store(config: &Config) -> Result<Arc<dyn TokenStore>> {
    match &config.session.credentials_path {
        Some(path) => {
            let store = FileTokenStore::load(path.clone())
                .await
                .with_context(|| format!("failed to load session from {}", path.display()))?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("no credentials_path configured, session will not survive a restart");
            Ok(Arc::new(MemoryTokenStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting session-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.proxy.listen_addr,
        upstream_url = %config.proxy.upstream_url,
        refresh_url = %config.refresh_url(),
        admin_listen_addr = ?config.session.admin_listen_addr,
        "configuration loaded"
    );

    let store = open_store(&config).await?;
    if store.current().await.is_none() {
        warn!("no active session, sign in through the admin API");
    }

    // The refresh call gets its own timeout so a hung backend cannot hold
    // queued requests forever.
    let auth_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.session.refresh_timeout_secs))
        .build()
        .context("failed to build auth HTTP client")?;

    let sign_out = Arc::new(ClearSession::new(store.clone()));
    let coordinator = RefreshCoordinator::new(
        store.clone(),
        Arc::new(HttpRefresher::new(auth_client.clone(), config.refresh_url())),
        sign_out.clone(),
    );

    let transport = HttpTransport::new(
        reqwest::Client::new(),
        config.proxy.upstream_url.clone(),
        Duration::from_secs(config.proxy.timeout_secs),
    );
    let interceptor = Arc::new(RequestInterceptor::new(
        Arc::new(transport),
        coordinator.clone(),
    ));

    let service_metrics = ServiceMetrics::new();
    let in_flight = service_metrics.in_flight.clone();

    let app_state = AppState {
        proxy: ProxyState {
            interceptor,
            metrics: service_metrics,
        },
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.proxy.max_connections);

    let listener = TcpListener::bind(config.proxy.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.proxy.listen_addr))?;

    // Graceful shutdown: one signal fans out to the gateway and admin
    // listeners; DRAIN_TIMEOUT starts when the signal fires.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let admin_handle = match config.session.admin_listen_addr {
        Some(admin_addr) => {
            let admin_app = admin::build_admin_router(AdminState::new(
                coordinator,
                sign_out,
                auth_client,
                config.sign_in_url(),
            ));
            let admin_listener = TcpListener::bind(admin_addr)
                .await
                .with_context(|| format!("failed to bind admin API to {admin_addr}"))?;
            info!(addr = %admin_addr, "admin API listening");

            let mut rx = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                axum::serve(admin_listener, admin_app)
                    .with_graceful_shutdown(async move {
                        let _ = rx.wait_for(|stop| *stop).await;
                    })
                    .await
            }))
        }
        None => None,
    };

    info!(addr = %config.proxy.listen_addr, "accepting requests");

    let mut rx = shutdown_rx;
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.wait_for(|stop| *stop).await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    if let Some(handle) = admin_handle {
        handle.abort();
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: session presence, refresh state, uptime, request totals.
/// Returns 200 with an active session, 503 when signed out.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = &state.proxy.metrics;
    let uptime = metrics.started_at.elapsed().as_secs();
    let requests = metrics.requests_total.load(Ordering::Relaxed);
    let errors = metrics.errors_total.load(Ordering::Relaxed);

    let coordinator = state.proxy.interceptor.coordinator();
    let signed_in = coordinator.store().current().await.is_some();
    let refresh = coordinator.snapshot().await;

    let (status_code, status, session) = if signed_in {
        (axum::http::StatusCode::OK, "healthy", "active")
    } else {
        (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "degraded",
            "signed_out",
        )
    };

    let body = serde_json::json!({
        "status": status,
        "session": session,
        "refresh": {
            "in_flight": refresh.in_flight,
            "waiters": refresh.waiters,
            "episodes": refresh.episodes,
        },
        "uptime_seconds": uptime,
        "requests_served": requests,
        "errors_total": errors,
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Catch-all handler that forwards every other route upstream.
async fn proxy_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    proxy::proxy_request(&state.proxy, request, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
