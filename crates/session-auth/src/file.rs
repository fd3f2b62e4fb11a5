//! File-backed token store
//!
//! Persists the session as a small JSON document
//! (`{"token": ..., "refreshToken": ..., "savedAt": <unix ms>}`). All writes
//! use atomic temp-file + rename so a crash mid-write never leaves a torn
//! session behind. A tokio Mutex serializes writes from the refresh task,
//! the admin API, and sign-out.
//!
//! A session older than its max age (30 days by default) reads as absent,
//! which the gateway reports as signed out.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::constants::SESSION_MAX_AGE;
use crate::credentials::{Credentials, TokenStore};
use crate::error::{Error, Result};

/// On-disk representation of a saved session.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSession {
    #[serde(flatten)]
    credentials: Credentials,
    /// When the pair was saved, unix timestamp in milliseconds
    #[serde(rename = "savedAt")]
    saved_at: u64,
}

/// Token store persisted to a single JSON file.
pub struct FileTokenStore {
    path: PathBuf,
    max_age: Duration,
    state: Mutex<Option<StoredSession>>,
}

impl FileTokenStore {
    /// Load the session from `path`.
    ///
    /// A missing file is a cold start with no session; the file is created on
    /// the first `save`.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading session file: {e}")))?;
            let session: StoredSession = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing session file: {e}")))?;
            info!(path = %path.display(), "loaded session");
            Some(session)
        } else {
            info!(path = %path.display(), "session file not found, starting signed out");
            None
        };

        Ok(Self {
            path,
            max_age: SESSION_MAX_AGE,
            state: Mutex::new(state),
        })
    }

    /// Override how long a saved session remains usable.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn current(&self) -> Pin<Box<dyn Future<Output = Option<Credentials>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let session = state.as_ref()?;
            if self.is_expired(session) {
                debug!("saved session is past its max age");
                return None;
            }
            Some(session.credentials.clone())
        })
    }

    fn save(
        &self,
        credentials: Credentials,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let session = StoredSession {
                credentials,
                saved_at: now_millis(),
            };
            // In-memory state is updated even if the disk write fails, so the
            // running process keeps using the freshest pair.
            *state = Some(session.clone());
            write_atomic(&self.path, &session).await
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            *state = None;
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    debug!(path = %self.path.display(), "removed session file");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::Io(format!("removing session file: {e}"))),
            }
        })
    }

    fn save_if_current<'a>(
        &'a self,
        expected_refresh_token: &'a str,
        credentials: Credentials,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let matches = state.as_ref().is_some_and(|session| {
                !self.is_expired(session)
                    && session.credentials.refresh_token() == expected_refresh_token
            });
            if !matches {
                debug!("stored session changed, not saving");
                return Ok(false);
            }
            let session = StoredSession {
                credentials,
                saved_at: now_millis(),
            };
            *state = Some(session.clone());
            write_atomic(&self.path, &session).await?;
            Ok(true)
        })
    }
}

impl FileTokenStore {
    fn is_expired(&self, session: &StoredSession) -> bool {
        let max_age_millis = self.max_age.as_millis() as u64;
        now_millis() > session.saved_at.saturating_add(max_age_millis)
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Write the session to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over the
/// target. Permissions are 0600 (owner read/write only) since the file holds
/// bearer tokens.
async fn write_atomic(path: &Path, session: &StoredSession) -> Result<()> {
    let json = serde_json::to_string_pretty(session)
        .map_err(|e| Error::CredentialParse(format!("serializing session: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("session path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting session file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted session");
    Ok(())
}
