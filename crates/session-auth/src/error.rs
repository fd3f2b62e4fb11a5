//! Error types for session auth operations

/// Errors from sign-in, refresh, and credential storage.
///
/// `Clone` so a single refresh failure can be handed to every request that
/// was waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("sign-in failed: {0}")]
    SignIn(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The stored session was cleared or replaced while a refresh was
    /// running; the refreshed pair was discarded.
    #[error("session changed during refresh: {0}")]
    SessionChanged(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
