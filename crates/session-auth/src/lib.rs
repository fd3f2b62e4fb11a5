//! Session credentials, token storage, and the auth backend calls
//!
//! Provides the credential pair the gateway authenticates with, the
//! `TokenStore` abstraction that holds it, and the two auth backend
//! interactions: sign-in (`POST /sessions`) and token refresh
//! (`POST /refresh`). This crate knows nothing about request coordination;
//! `session-refresh` drives it.
//!
//! Session flow:
//! 1. Admin signs in via `token::sign_in()` with email and password
//! 2. Credentials saved via `TokenStore::save()`
//! 3. Every outbound request reads `TokenStore::current_access_token()`
//! 4. On expiry the coordinator calls `Refresher::refresh()` once
//! 5. Rotated credentials replace the old pair via `TokenStore::save()`
//! 6. Sign-out calls `TokenStore::clear()`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod file;
pub mod token;

pub use constants::*;
pub use credentials::{Credentials, MemoryTokenStore, TokenStore};
pub use error::{Error, Result};
pub use file::FileTokenStore;
pub use token::{HttpRefresher, Refresher, refresh_session, sign_in};
