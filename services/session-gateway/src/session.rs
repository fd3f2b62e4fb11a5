//! Sign-out collaborator

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use session_auth::TokenStore;
use session_refresh::SignOut;
use tracing::{info, warn};

/// Signs the gateway out by clearing the token store.
///
/// Called by the refresh coordinator on a non-expired 401 and by the admin
/// API's `DELETE /admin/session`.
pub struct ClearSession {
    store: Arc<dyn TokenStore>,
}

impl ClearSession {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }
}

impl SignOut for ClearSession {
    fn sign_out(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            metrics::counter!("session_sign_out_total").increment(1);
            match self.store.clear().await {
                Ok(()) => info!("session cleared, gateway signed out"),
                Err(e) => warn!(error = %e, "failed to clear stored session"),
            }
        })
    }
}
