//! OAuth2 refresh-token rotation for provider credentials.
//!
//! The stored secret is the compound `client_secret;refresh_token`. Each
//! successful refresh invalidates the old refresh token on the provider side,
//! so the new pair must be written back before any other provider call is
//! made. Refreshes for one provider are serialized in-process by
//! [`RefreshLocks`] and guarded in the store by a compare-and-swap.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;

use cb_core::{Error, ProviderId, Result};
use cb_db::models::ProviderPlatform;
use cb_db::pool::{get_conn, DbPool};
use cb_db::queries::providers;

use crate::http::ProviderClient;

// ---------------------------------------------------------------------------
// ProviderCredential
// ---------------------------------------------------------------------------

/// A provider credential with its compound secret split apart.
#[derive(Clone)]
pub struct ProviderCredential {
    pub provider_id: ProviderId,
    pub kind: String,
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// The stored secret exactly as read, used as the CAS expectation.
    stored_key: String,
}

impl ProviderCredential {
    /// Split a stored platform row. Fails with `Configuration` when the
    /// secret does not carry two non-empty parts.
    pub fn from_platform(platform: &ProviderPlatform) -> Result<Self> {
        let (client_secret, refresh_token) = secret_parts(&platform.access_key).ok_or_else(|| {
            Error::Configuration(format!(
                "provider {} has a malformed access key; expected client_secret;refresh_token",
                platform.id
            ))
        })?;

        if platform.account_id.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "provider {} has no client id",
                platform.id
            )));
        }

        Ok(Self {
            provider_id: platform.id,
            kind: platform.kind.clone(),
            base_url: platform.base_url.trim_end_matches('/').to_string(),
            client_id: platform.account_id.clone(),
            client_secret,
            refresh_token,
            stored_key: platform.access_key.clone(),
        })
    }

    /// The compound secret for a rotated refresh token.
    fn rotated_key(&self, refresh_token: &str) -> String {
        format!("{};{}", self.client_secret, refresh_token)
    }
}

impl std::fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("provider_id", &self.provider_id)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

fn secret_parts(access_key: &str) -> Option<(String, String)> {
    let mut parts = access_key.split(';');
    let secret = parts.next()?.trim();
    let refresh = parts.next()?.trim();
    if secret.is_empty() || refresh.is_empty() {
        return None;
    }
    Some((secret.to_string(), refresh.to_string()))
}

// ---------------------------------------------------------------------------
// RefreshLocks
// ---------------------------------------------------------------------------

/// Per-provider async mutexes so only one refresh runs per provider.
#[derive(Clone, Default)]
pub struct RefreshLocks {
    locks: Arc<DashMap<ProviderId, Arc<tokio::sync::Mutex<()>>>>,
}

impl RefreshLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, provider: ProviderId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.entry(provider).or_default().clone()
    }
}

// ---------------------------------------------------------------------------
// TokenManager
// ---------------------------------------------------------------------------

/// A bearer token obtained from a refresh.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub obtained_at: DateTime<Utc>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("obtained_at", &self.obtained_at)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

pub struct TokenManager {
    client: ProviderClient,
    db: DbPool,
    locks: RefreshLocks,
    token_endpoint: String,
    scope: String,
}

impl TokenManager {
    pub fn new(
        client: ProviderClient,
        db: DbPool,
        locks: RefreshLocks,
        token_endpoint: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            client,
            db,
            locks,
            token_endpoint: token_endpoint.into(),
            scope: scope.into(),
        }
    }

    /// Exchange the stored refresh token for a new access/refresh pair and
    /// persist the rotated secret.
    ///
    /// The credential is re-read after the provider lock is held so a job
    /// that waited behind another refresh uses the freshly rotated token.
    pub async fn refresh(&self, provider: ProviderId) -> Result<AccessToken> {
        let lock = self.locks.lock_for(provider);
        let _guard = lock.lock().await;

        let credential = {
            let conn = get_conn(&self.db)?;
            let platform = providers::get_provider(&conn, provider)?
                .ok_or_else(|| Error::not_found("provider", provider))?;
            ProviderCredential::from_platform(&platform)?
        };

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", credential.refresh_token.as_str()),
            ("client_id", credential.client_id.as_str()),
            ("client_secret", credential.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let resp = self
            .client
            .send(|http| http.post(&self.token_endpoint).form(&form))
            .await
            .map_err(|e| Error::Auth(format!("token request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "token endpoint returned {status}: {}",
                body.trim()
            )));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::Auth(format!("unreadable token response: {e}")))?;

        let access = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Auth("token response has no access_token".into()))?;

        // From here on the provider may already have invalidated the old
        // refresh token; failures become CredentialState.
        match body.refresh_token.filter(|t| !t.is_empty()) {
            Some(rotated) if rotated != credential.refresh_token => {
                self.persist(&credential, &rotated)?;
            }
            _ => {
                tracing::debug!(provider = %provider, "Provider did not rotate the refresh token");
            }
        }

        tracing::info!(provider = %provider, "Refreshed provider credential");
        Ok(AccessToken {
            token: access,
            obtained_at: Utc::now(),
        })
    }

    fn persist(&self, credential: &ProviderCredential, rotated: &str) -> Result<()> {
        let new_key = credential.rotated_key(rotated);
        let provider = credential.provider_id;

        let stored = get_conn(&self.db).and_then(|conn| {
            providers::rotate_access_key(&conn, provider, &credential.stored_key, &new_key)
        });

        match stored {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::error!(provider = %provider, "Stored credential changed during refresh");
                Err(Error::CredentialState(format!(
                    "provider {provider}: stored credential changed while refreshing; rotated token was not saved"
                )))
            }
            Err(e) => {
                tracing::error!(provider = %provider, error = %e, "Failed to persist rotated credential");
                Err(Error::CredentialState(format!(
                    "provider {provider}: rotated token could not be saved: {e}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_db::pool::init_memory_pool;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn platform(access_key: &str) -> ProviderPlatform {
        ProviderPlatform {
            id: ProviderId::from(1),
            name: "p".into(),
            kind: "brightspace".into(),
            base_url: "https://lms.example/".into(),
            account_id: "client".into(),
            access_key: access_key.into(),
            state: "enabled".into(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn splits_compound_secret() {
        let cred = ProviderCredential::from_platform(&platform("sec;ref")).unwrap();
        assert_eq!(cred.client_secret, "sec");
        assert_eq!(cred.refresh_token, "ref");
        assert_eq!(cred.base_url, "https://lms.example");
        assert_eq!(cred.rotated_key("new"), "sec;new");
    }

    #[test]
    fn malformed_secret_is_configuration_error() {
        for key in ["", "only-secret", "sec;", ";ref"] {
            let err = ProviderCredential::from_platform(&platform(key)).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{key:?}");
        }
    }

    #[test]
    fn debug_hides_secrets() {
        let cred = ProviderCredential::from_platform(&platform("sec;ref")).unwrap();
        let out = format!("{cred:?}");
        assert!(!out.contains("sec"));
        assert!(!out.contains("ref"));
    }

    async fn setup(server: &MockServer) -> (TokenManager, DbPool, ProviderId) {
        let db = init_memory_pool().unwrap();
        let p = {
            let conn = db.get().unwrap();
            providers::create_provider(&conn, "p", "brightspace", &server.uri(), "client", "sec;r1")
                .unwrap()
        };
        let manager = TokenManager::new(
            ProviderClient::new(Duration::from_secs(5), 100).unwrap(),
            db.clone(),
            RefreshLocks::new(),
            format!("{}/core/connect/token", server.uri()),
            "scope:a",
        );
        (manager, db, p.id)
    }

    #[tokio::test]
    async fn refresh_rotates_stored_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/core/connect/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "refresh_token": "r2",
            })))
            .mount(&server)
            .await;

        let (manager, db, id) = setup(&server).await;
        let token = manager.refresh(id).await.unwrap();
        assert_eq!(token.token, "at");

        let stored = providers::get_provider(&db.get().unwrap(), id).unwrap().unwrap();
        assert_eq!(stored.access_key, "sec;r2");
    }

    #[tokio::test]
    async fn rejection_is_auth_error_without_mutation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let (manager, db, id) = setup(&server).await;
        let err = manager.refresh(id).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));

        let stored = providers::get_provider(&db.get().unwrap(), id).unwrap().unwrap();
        assert_eq!(stored.access_key, "sec;r1");
    }

    #[tokio::test]
    async fn missing_access_token_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let (manager, _db, id) = setup(&server).await;
        assert!(matches!(manager.refresh(id).await, Err(Error::Auth(_))));
    }

    #[tokio::test]
    async fn lost_cas_is_credential_state_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "refresh_token": "r2",
            })))
            .mount(&server)
            .await;

        let (manager, db, id) = setup(&server).await;
        let cred = {
            let conn = db.get().unwrap();
            let platform = providers::get_provider(&conn, id).unwrap().unwrap();
            // Another writer rotates first.
            providers::rotate_access_key(&conn, id, "sec;r1", "sec;other").unwrap();
            ProviderCredential::from_platform(&platform).unwrap()
        };

        let err = manager.persist(&cred, "r2").unwrap_err();
        assert!(matches!(err, Error::CredentialState(_)));
        let stored = providers::get_provider(&db.get().unwrap(), id).unwrap().unwrap();
        assert_eq!(stored.access_key, "sec;other");
    }

    #[tokio::test]
    async fn unknown_provider_is_not_found() {
        let server = MockServer::start().await;
        let (manager, _db, _id) = setup(&server).await;
        let err = manager.refresh(ProviderId::from(404)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
