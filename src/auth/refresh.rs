// Token refresh protocol
//
// NoRefreshToken -> Fail(MissingRefreshToken)
// HasRefreshToken -> RequestSent -> Success | Fail
//
// No retry of its own: one failure is terminal for the calling request.

use tokio_util::sync::CancellationToken;

use super::credentials::{CredentialStore, AUTH_TOKEN_KEY, REFRESH_TOKEN_KEY};
use super::identity::IdentityClient;
use super::types::TokenData;
use crate::error::{AuthError, Result};
use crate::http_client::token_preview;

/// Observable steps of one refresh run
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RefreshState {
    NoRefreshToken,
    HasRefreshToken,
    RequestSent,
    Succeeded,
    Failed(String),
}

/// Run the refresh-token grant and persist its result
///
/// The new access token is always written; the refresh token only when the
/// response rotated it. Nothing is written on failure.
pub async fn refresh_stored_credentials(
    identity: &IdentityClient,
    store: &dyn CredentialStore,
    cancel: Option<&CancellationToken>,
) -> Result<String> {
    let Some(refresh_token) = store.get(REFRESH_TOKEN_KEY).filter(|t| !t.is_empty()) else {
        log_transition(&RefreshState::NoRefreshToken);
        log_transition(&RefreshState::Failed("missing refresh token".to_string()));
        return Err(AuthError::MissingRefreshToken);
    };
    log_transition(&RefreshState::HasRefreshToken);

    log_transition(&RefreshState::RequestSent);
    let token_data = match identity.refresh_token(&refresh_token, cancel).await {
        Ok(data) => data,
        Err(e) => {
            log_transition(&RefreshState::Failed(e.to_string()));
            return Err(e);
        }
    };

    persist(store, &token_data);
    log_transition(&RefreshState::Succeeded);

    tracing::info!(
        token = %token_preview(&token_data.access_token),
        "Stored refreshed access token"
    );

    Ok(token_data.access_token)
}

fn persist(store: &dyn CredentialStore, token_data: &TokenData) {
    store.set(AUTH_TOKEN_KEY, &token_data.access_token);
    if let Some(ref new_refresh_token) = token_data.refresh_token {
        store.set(REFRESH_TOKEN_KEY, new_refresh_token);
    }
}

fn log_transition(state: &RefreshState) {
    match state {
        RefreshState::Failed(reason) => {
            tracing::warn!(state = ?state, reason = %reason, "Refresh protocol failed")
        }
        _ => tracing::debug!(state = ?state, "Refresh protocol transition"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::MemoryCredentialStore;
    use crate::config::Config;
    use reqwest::Client;
    use std::sync::Arc;

    fn identity_for(store: Arc<MemoryCredentialStore>) -> IdentityClient {
        let config = Arc::new(Config {
            // Nothing listens here; tests below never reach the network
            identity_base_url: Some("http://127.0.0.1:9".to_string()),
            ..Config::default()
        });
        IdentityClient::new(Client::new(), config, store)
    }

    #[tokio::test]
    async fn test_missing_refresh_token() {
        let store = Arc::new(MemoryCredentialStore::with_tokens("T1", None));
        let identity = identity_for(store.clone());

        let err = refresh_stored_credentials(&identity, store.as_ref(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingRefreshToken));
        // Access token untouched
        assert_eq!(store.get(AUTH_TOKEN_KEY).as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn test_empty_refresh_token_counts_as_missing() {
        let store = Arc::new(MemoryCredentialStore::with_tokens("T1", Some("")));
        let identity = identity_for(store.clone());

        let err = refresh_stored_credentials(&identity, store.as_ref(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingRefreshToken));
    }

    #[tokio::test]
    async fn test_cancelled_refresh_writes_nothing() {
        let store = Arc::new(MemoryCredentialStore::with_tokens("T1", Some("R1")));
        let identity = identity_for(store.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = refresh_stored_credentials(&identity, store.as_ref(), Some(&cancel))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Cancelled));
        assert_eq!(store.get(AUTH_TOKEN_KEY).as_deref(), Some("T1"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("R1"));
    }

    #[test]
    fn test_persist_keeps_old_refresh_token() {
        let store = MemoryCredentialStore::with_tokens("T1", Some("R1"));
        persist(
            &store,
            &TokenData {
                access_token: "T2".to_string(),
                refresh_token: None,
            },
        );
        assert_eq!(store.get(AUTH_TOKEN_KEY).as_deref(), Some("T2"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("R1"));

        persist(
            &store,
            &TokenData {
                access_token: "T3".to_string(),
                refresh_token: Some("R3".to_string()),
            },
        );
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("R3"));
    }
}
