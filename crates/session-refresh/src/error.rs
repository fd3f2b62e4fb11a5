//! Error types surfaced to callers of the interceptor

use transport::TransportError;

/// Terminal failure of an intercepted request.
///
/// Identical in kind to what the caller would have seen without
/// coordination, except that a failed refresh surfaces as `RefreshFailed`
/// rather than the original expired-token response.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Network error, timeout, or a non-401 status. Not handled here.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// 401 without the expired-token code. Sign-out has been triggered.
    #[error("unauthorized, session signed out: {0}")]
    Unauthorized(TransportError),

    /// The refresh call for this request's episode failed.
    #[error("session refresh failed: {0}")]
    RefreshFailed(session_auth::Error),
}

/// Result alias for intercepted requests.
pub type Result<T> = std::result::Result<T, Error>;
