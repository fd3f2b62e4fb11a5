//! Credential pair and the token store abstraction
//!
//! `Credentials` is an immutable access/refresh token pair. A refresh never
//! edits a pair in place: it produces a new one and the store swaps it in.
//!
//! `TokenStore` is the seam between coordination and persistence. The
//! coordinator only needs the current refresh token and a way to save the
//! rotated pair; the gateway additionally reads the access token for every
//! outbound request and clears the store on sign-out.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;

/// Access/refresh token pair.
///
/// Serialized with the backend's field names (`token`, `refreshToken`) so
/// sign-in and refresh responses deserialize straight into it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "token")]
    access_token: String,
    #[serde(rename = "refreshToken")]
    refresh_token: String,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// Holder of the current session credentials.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn TokenStore>`).
pub trait TokenStore: Send + Sync {
    /// The current credential pair, or None when signed out.
    fn current(&self) -> Pin<Box<dyn Future<Output = Option<Credentials>> + Send + '_>>;

    /// Replace the stored pair.
    fn save(
        &self,
        credentials: Credentials,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Forget the stored pair (sign-out).
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Replace the stored pair only if its refresh token is still
    /// `expected_refresh_token`. Returns false, leaving the store untouched,
    /// when the session was cleared or replaced in the meantime.
    ///
    /// The comparison and the write happen under the store's own lock.
    fn save_if_current<'a>(
        &'a self,
        expected_refresh_token: &'a str,
        credentials: Credentials,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

    fn current_refresh_token(&self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        Box::pin(async move { self.current().await.map(|c| c.refresh_token().to_string()) })
    }

    fn current_access_token(&self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        Box::pin(async move { self.current().await.map(|c| c.access_token().to_string()) })
    }
}

/// In-process token store. The session is lost on restart.
#[derive(Default)]
pub struct MemoryTokenStore {
    state: RwLock<Option<Credentials>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            state: RwLock::new(Some(credentials)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn current(&self) -> Pin<Box<dyn Future<Output = Option<Credentials>> + Send + '_>> {
        Box::pin(async move { self.state.read().await.clone() })
    }

    fn save(
        &self,
        credentials: Credentials,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.state.write().await = Some(credentials);
            debug!("saved credentials in memory");
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.state.write().await = None;
            debug!("cleared in-memory credentials");
            Ok(())
        })
    }

    fn save_if_current<'a>(
        &'a self,
        expected_refresh_token: &'a str,
        credentials: Credentials,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            match state.as_ref() {
                Some(current) if current.refresh_token() == expected_refresh_token => {
                    *state = Some(credentials);
                    debug!("saved refreshed credentials in memory");
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }
}
