//! Admin API for the gateway session
//!
//! Runs on a separate listener (`session.admin_listen_addr`) and is only
//! started when that address is configured. Never returns tokens.
//!
//! Endpoints:
//! - GET    /admin/session          - signed-in flag and refresh state
//! - POST   /admin/session/sign-in  - sign in with email and password
//! - PUT    /admin/session          - install a token pair directly
//! - DELETE /admin/session          - sign out

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use common::Secret;
use serde::Deserialize;
use session_auth::{Credentials, TokenStore};
use session_refresh::{RefreshCoordinator, SignOut};
use tracing::{info, warn};

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    coordinator: RefreshCoordinator,
    sign_out: Arc<dyn SignOut>,
    http_client: reqwest::Client,
    sign_in_url: String,
}

impl AdminState {
    pub fn new(
        coordinator: RefreshCoordinator,
        sign_out: Arc<dyn SignOut>,
        http_client: reqwest::Client,
        sign_in_url: String,
    ) -> Self {
        Self {
            coordinator,
            sign_out,
            http_client,
            sign_in_url,
        }
    }

    fn store(&self) -> &Arc<dyn TokenStore> {
        self.coordinator.store()
    }
}

/// Build the admin axum router.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route(
            "/admin/session",
            get(session_status).put(put_session).delete(delete_session),
        )
        .route("/admin/session/sign-in", post(sign_in))
        .with_state(state)
}

type JsonResponse = (StatusCode, [(HeaderName, &'static str); 1], String);

fn json(status: StatusCode, body: serde_json::Value) -> JsonResponse {
    (status, [(CONTENT_TYPE, "application/json")], body.to_string())
}

/// GET /admin/session
async fn session_status(State(state): State<AdminState>) -> impl IntoResponse {
    let signed_in = state.store().current().await.is_some();
    let refresh = state.coordinator.snapshot().await;

    json(
        StatusCode::OK,
        serde_json::json!({
            "signed_in": signed_in,
            "refresh": {
                "in_flight": refresh.in_flight,
                "waiters": refresh.waiters,
                "episodes": refresh.episodes,
            }
        }),
    )
}

#[derive(Deserialize)]
struct SignInRequest {
    email: String,
    password: Secret<String>,
}

/// POST /admin/session/sign-in
///
/// Exchanges email and password at the backend's sign-in endpoint and stores
/// the returned pair.
async fn sign_in(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<SignInRequest>,
) -> impl IntoResponse {
    if body.email.trim().is_empty() || body.password.is_blank() {
        return json(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "email and password are required" }),
        );
    }

    let credentials = match session_auth::sign_in(
        &state.http_client,
        &state.sign_in_url,
        &body.email,
        &body.password,
    )
    .await
    {
        Ok(c) => c,
        Err(session_auth::Error::InvalidCredentials(e)) => {
            warn!(error = %e, "sign-in rejected");
            return json(
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "error": "email or password incorrect" }),
            );
        }
        Err(e) => {
            warn!(error = %e, "sign-in failed");
            return json(
                StatusCode::BAD_GATEWAY,
                serde_json::json!({ "error": format!("sign-in failed: {e}") }),
            );
        }
    };

    store_session(&state, credentials, "signed in").await
}

/// PUT /admin/session
///
/// Body uses the backend's field names: `{"token": ..., "refreshToken": ...}`.
async fn put_session(
    State(state): State<AdminState>,
    axum::Json(credentials): axum::Json<Credentials>,
) -> impl IntoResponse {
    if credentials.access_token().trim().is_empty() || credentials.refresh_token().trim().is_empty()
    {
        return json(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "token and refreshToken must be non-empty" }),
        );
    }

    store_session(&state, credentials, "session installed").await
}

async fn store_session(
    state: &AdminState,
    credentials: Credentials,
    action: &str,
) -> JsonResponse {
    if let Err(e) = state.store().save(credentials).await {
        warn!(error = %e, "failed to store session");
        return json(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": format!("failed to store session: {e}") }),
        );
    }

    info!("{action} via admin API");
    json(StatusCode::OK, serde_json::json!({ "status": "signed_in" }))
}

/// DELETE /admin/session
async fn delete_session(State(state): State<AdminState>) -> impl IntoResponse {
    state.sign_out.sign_out().await;
    json(StatusCode::OK, serde_json::json!({ "status": "signed_out" }))
}
