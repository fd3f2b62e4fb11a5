//! Auth backend defaults

use std::time::Duration;

/// Refresh endpoint path on the API backend
pub const DEFAULT_REFRESH_PATH: &str = "/refresh";

/// Sign-in endpoint path on the API backend
pub const DEFAULT_SIGN_IN_PATH: &str = "/sessions";

/// How long a persisted session stays usable after it was last saved (30 days).
pub const SESSION_MAX_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 30);
