//! Sign-in and token refresh against the API backend
//!
//! Both calls POST JSON to the backend and expect `{"token", "refreshToken"}`
//! back:
//! 1. Sign-in: `{"email", "password"}` to the sign-in path
//! 2. Refresh: `{"refreshToken"}` to the refresh path
//!
//! These requests go out on a plain reqwest client, never through the
//! request interceptor, so a failing refresh can't recurse into another
//! refresh.

use std::future::Future;
use std::pin::Pin;

use common::Secret;
use serde::Serialize;
use tracing::debug;

use crate::credentials::Credentials;
use crate::error::{Error, Result};

#[derive(Serialize)]
struct RefreshRequest<'a> {
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Exchange a refresh token for a new credential pair.
///
/// 401/403 means the refresh token itself is revoked or invalid; any other
/// non-success status is reported with the backend's body for diagnosis.
pub async fn refresh_session(
    client: &reqwest::Client,
    endpoint: &str,
    refresh_token: &str,
) -> Result<Credentials> {
    let response = client
        .post(endpoint)
        .json(&RefreshRequest { refresh_token })
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::Refresh(format!(
            "refresh endpoint returned {status}: {body}"
        )));
    }

    let credentials = response
        .json::<Credentials>()
        .await
        .map_err(|e| Error::Refresh(format!("invalid refresh response: {e}")))?;
    debug!("refresh endpoint issued new credentials");
    Ok(credentials)
}

/// Open a session with email and password.
pub async fn sign_in(
    client: &reqwest::Client,
    endpoint: &str,
    email: &str,
    password: &Secret<String>,
) -> Result<Credentials> {
    let response = client
        .post(endpoint)
        .json(&SignInRequest {
            email,
            password: password.expose(),
        })
        .send()
        .await
        .map_err(|e| Error::Http(format!("sign-in request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 401 {
            return Err(Error::InvalidCredentials(format!(
                "sign-in rejected ({status}): {body}"
            )));
        }

        return Err(Error::SignIn(format!(
            "sign-in endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<Credentials>()
        .await
        .map_err(|e| Error::SignIn(format!("invalid sign-in response: {e}")))
}

/// Performs the refresh call for the coordinator.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Refresher>`).
pub trait Refresher: Send + Sync {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Credentials>> + Send + 'a>>;
}

/// Refresher that calls the backend's refresh endpoint over HTTP.
///
/// Give it a client with a request timeout: a hung refresh would otherwise
/// hold every waiting request hostage.
pub struct HttpRefresher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRefresher {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Refresher for HttpRefresher {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Credentials>> + Send + 'a>> {
        Box::pin(refresh_session(&self.client, &self.endpoint, refresh_token))
    }
}
