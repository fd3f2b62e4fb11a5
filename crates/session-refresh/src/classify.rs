//! Failure classification
//!
//! Only one failure shape belongs to the coordinator: HTTP 401 whose body
//! carries `"code": "token.expired"`. Every other 401 means the session is
//! unusable and triggers sign-out. Everything else (network errors,
//! timeouts, other statuses) is passed through untouched.

use transport::TransportError;

/// Backend error code marking an access token past its validity window.
pub const EXPIRED_TOKEN_CODE: &str = "token.expired";

/// What the coordinator should do with a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 401 + `token.expired`: refresh and replay
    Expired,
    /// Any other 401: sign out and propagate
    Unauthorized,
    /// Not an auth failure: propagate unchanged
    Other,
}

/// Classify by HTTP status and backend error code. The match is exact:
/// no case folding, no trimming.
pub fn classify_status(status: Option<u16>, code: Option<&str>) -> FailureClass {
    match (status, code) {
        (Some(401), Some(EXPIRED_TOKEN_CODE)) => FailureClass::Expired,
        (Some(401), _) => FailureClass::Unauthorized,
        _ => FailureClass::Other,
    }
}

/// Classify a transport error.
pub fn classify(error: &TransportError) -> FailureClass {
    classify_status(error.status(), error.code())
}
