use reqwest::Client;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::credentials::{clear_credentials, CredentialStore, AUTH_TOKEN_KEY};
use super::identity::IdentityClient;
use super::refresh;
use super::types::LoginResult;
use crate::config::Config;
use crate::error::{AuthError, Result};
use crate::http_client::token_preview;

/// Authentication manager
/// Owns the credential store and serializes token refreshes
pub struct AuthManager {
    /// Credential persistence
    store: Arc<dyn CredentialStore>,

    /// Identity service client
    identity: Arc<IdentityClient>,

    /// Held for the duration of a refresh so concurrent 401s share one
    refresh_lock: Mutex<()>,
}

impl AuthManager {
    pub fn new(
        client: Client,
        config: Arc<Config>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let identity = Arc::new(IdentityClient::new(client, config, store.clone()));
        Self::with_identity(identity, store)
    }

    pub fn with_identity(identity: Arc<IdentityClient>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            identity,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn identity(&self) -> &IdentityClient {
        &self.identity
    }

    pub fn store(&self) -> &dyn CredentialStore {
        self.store.as_ref()
    }

    /// Current access token, if any
    pub fn access_token(&self) -> Option<String> {
        self.store.get(AUTH_TOKEN_KEY).filter(|t| !t.is_empty())
    }

    /// Obtain a fresh access token after `stale_token` was rejected
    ///
    /// Only one refresh runs at a time. A caller that waited on another
    /// refresh and finds the stored token already replaced reuses it.
    ///
    /// A failed refresh clears both slots before the lock is released, so
    /// waiters never retry a refresh token that was just rejected.
    /// Cancellation leaves the store untouched.
    pub async fn refresh_after_rejection(
        &self,
        stale_token: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<String> {
        let _guard = self.refresh_lock.lock().await;

        if let (Some(stale), Some(current)) = (stale_token, self.access_token()) {
            if stale != current {
                tracing::debug!(
                    token = %token_preview(&current),
                    "Access token already refreshed by a concurrent request"
                );
                return Ok(current);
            }
        }

        match refresh::refresh_stored_credentials(&self.identity, self.store.as_ref(), cancel)
            .await
        {
            Err(AuthError::Cancelled) => Err(AuthError::Cancelled),
            Err(e) => {
                tracing::error!(error = %e, "Token refresh failed, signing out");
                self.sign_out();
                Err(e)
            }
            ok => ok,
        }
    }

    /// Persist a login result; returns false when it carried no token
    pub fn persist_login(&self, result: &LoginResult) -> bool {
        match result.credential() {
            Some(credential) => {
                credential.save(self.store.as_ref());
                tracing::info!(
                    token = %token_preview(&credential.access_token),
                    has_refresh_token = credential.refresh_token.is_some(),
                    "Stored login credentials"
                );
                true
            }
            None => {
                tracing::warn!("Login response carried no token; nothing stored");
                false
            }
        }
    }

    /// Drop both local credential slots
    pub fn sign_out(&self) {
        clear_credentials(self.store.as_ref());
        tracing::info!("Local credentials cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::{MemoryCredentialStore, REFRESH_TOKEN_KEY};
    use serde_json::json;

    fn manager_with(store: Arc<MemoryCredentialStore>) -> AuthManager {
        let config = Arc::new(Config {
            identity_base_url: Some("http://127.0.0.1:9".to_string()),
            ..Config::default()
        });
        AuthManager::new(Client::new(), config, store)
    }

    #[tokio::test]
    async fn test_reuses_token_refreshed_concurrently() {
        let store = Arc::new(MemoryCredentialStore::with_tokens("T2", Some("R1")));
        let manager = manager_with(store);

        // Request carried T1, store already holds T2: no identity call needed
        let token = manager
            .refresh_after_rejection(Some("T1"), None)
            .await
            .unwrap();
        assert_eq!(token, "T2");
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_store_under_lock() {
        let store = Arc::new(MemoryCredentialStore::with_tokens("T1", None));
        let manager = manager_with(store.clone());

        let err = manager
            .refresh_after_rejection(Some("T1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingRefreshToken));
        assert_eq!(store.get(AUTH_TOKEN_KEY), None);
        assert_eq!(store.get(REFRESH_TOKEN_KEY), None);

        // A waiter arriving afterwards finds nothing to refresh with
        let err = manager
            .refresh_after_rejection(Some("T1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingRefreshToken));
    }

    #[tokio::test]
    async fn test_cancelled_refresh_keeps_store() {
        let store = Arc::new(MemoryCredentialStore::with_tokens("T1", Some("R1")));
        let manager = manager_with(store.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = manager
            .refresh_after_rejection(Some("T1"), Some(&cancel))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Cancelled));
        assert_eq!(store.get(AUTH_TOKEN_KEY).as_deref(), Some("T1"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("R1"));
    }

    #[test]
    fn test_persist_login() {
        let store = Arc::new(MemoryCredentialStore::new());
        let manager = manager_with(store.clone());

        let stored = manager.persist_login(&LoginResult {
            token: "T1".to_string(),
            refresh_token: "R1".to_string(),
            raw: json!({}),
        });
        assert!(stored);
        assert_eq!(manager.access_token().as_deref(), Some("T1"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("R1"));

        let stored = manager.persist_login(&LoginResult {
            token: String::new(),
            refresh_token: String::new(),
            raw: json!({}),
        });
        assert!(!stored);
        assert_eq!(manager.access_token().as_deref(), Some("T1"));
    }

    #[test]
    fn test_sign_out_clears_both_slots() {
        let store = Arc::new(MemoryCredentialStore::with_tokens("T1", Some("R1")));
        let manager = manager_with(store.clone());

        manager.sign_out();
        assert_eq!(store.get(AUTH_TOKEN_KEY), None);
        assert_eq!(store.get(REFRESH_TOKEN_KEY), None);
        assert_eq!(manager.access_token(), None);
    }
}
