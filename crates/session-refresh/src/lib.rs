//! Expired-token refresh coordination
//!
//! Sits between outbound requests and the transport. When a request fails
//! with `401 {"code": "token.expired"}` the coordinator runs exactly one
//! refresh for every request that hits the expiry, queues the rest behind it,
//! and resumes or rejects all of them once the refresh settles.
//!
//! Request lifecycle:
//! 1. `RequestInterceptor::send` stamps the current bearer token and sends
//! 2. Success → returned as-is
//! 3. Expired token → `RefreshCoordinator::handle_failure` starts or joins a
//!    refresh episode and suspends the caller
//! 4. Refresh succeeds → every waiter replays once with the new token, FIFO
//! 5. Refresh fails → every waiter gets `Error::RefreshFailed`, FIFO
//! 6. Any other 401 → sign-out, original error propagated, nothing queued

pub mod classify;
pub mod coordinator;
pub mod error;
pub mod interceptor;
mod state;

#[cfg(test)]
mod test_support;

pub use classify::{EXPIRED_TOKEN_CODE, FailureClass, classify, classify_status};
pub use coordinator::{Outcome, RefreshCoordinator, SignOut};
pub use error::{Error, Result};
pub use interceptor::RequestInterceptor;
pub use state::RefreshSnapshot;
