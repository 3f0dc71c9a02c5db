use std::{sync::Arc, time::Duration};

use async_lock::Mutex;
use base64::Engine;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{QBContext, QBCredentials, RetryPolicy};
use crate::{
    error::APIError,
    secrets::{get_secret_json, put_secret_json, SecretStore},
    APIResult, Environment,
};

/// Token state shared by every request made through one context.
struct TokenState {
    credentials: QBCredentials,
    /// Bumped on every successful refresh.
    generation: u64,
    /// Rotated credentials the store has not accepted yet.
    unpersisted: bool,
}

/// A [`QBContext`] that owns the OAuth credentials and keeps them current.
///
/// Access tokens are renewed on demand, the rotated refresh token is written
/// back to the secrets store, and concurrent callers share a single refresh.
pub struct RefreshableQBContext {
    pub(crate) context: QBContext,
    secret_name: String,
    store: Arc<dyn SecretStore>,
    state: Mutex<TokenState>,
    retry: RetryPolicy,
}

impl RefreshableQBContext {
    /// Wraps already loaded credentials.
    ///
    /// # Errors
    ///
    /// [`APIError::MissingCredential`] if a field needed for refresh is empty.
    pub fn new(
        context: QBContext,
        credentials: QBCredentials,
        secret_name: impl Into<String>,
        store: Arc<dyn SecretStore>,
    ) -> APIResult<Self> {
        credentials.validate()?;
        Ok(Self {
            context,
            secret_name: secret_name.into(),
            store,
            state: Mutex::new(TokenState {
                credentials,
                generation: 0,
                unpersisted: false,
            }),
            retry: RetryPolicy::default(),
        })
    }

    /// Loads the credential blob `secret_name` and builds a context for its realm.
    ///
    /// # Errors
    ///
    /// Store failures, or an incomplete credential blob.
    pub async fn from_store(
        environment: Environment,
        secret_name: &str,
        store: Arc<dyn SecretStore>,
    ) -> APIResult<Self> {
        let credentials: QBCredentials = get_secret_json(store.as_ref(), secret_name).await?;
        let context = QBContext::new(environment, credentials.realm_id.clone())?;
        log::info!("Loaded QuickBooks credentials for realm {}", context.company_id);
        Self::new(context, credentials, secret_name, store)
    }

    #[must_use]
    pub fn with_endpoints(self, base_url: Url, token_endpoint: Url) -> Self {
        Self {
            context: self.context.with_endpoints(base_url, token_endpoint),
            ..self
        }
    }

    #[must_use]
    pub fn with_timeouts(self, request_timeout: Duration, upload_timeout: Duration) -> Self {
        Self {
            context: self.context.with_timeouts(request_timeout, upload_timeout),
            ..self
        }
    }

    #[must_use]
    pub fn with_retry_policy(self, retry: RetryPolicy) -> Self {
        Self { retry, ..self }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// The access token currently held, without checking its expiry.
    pub async fn access_token(&self) -> Option<String> {
        self.state.lock().await.credentials.access_token.clone()
    }

    /// Snapshot of the credentials as they are now.
    pub async fn credentials(&self) -> QBCredentials {
        self.state.lock().await.credentials.clone()
    }

    /// Returns a usable access token and its generation, refreshing first if
    /// the held token is missing or about to expire.
    ///
    /// # Errors
    ///
    /// [`APIError::Auth`] if the token endpoint rejects the refresh.
    pub async fn ensure_fresh(&self, client: &Client) -> APIResult<(String, u64)> {
        let (token, generation, _) = self.ensure_fresh_tracked(client).await?;
        Ok((token, generation))
    }

    /// [`ensure_fresh`](Self::ensure_fresh), also reporting whether this call
    /// performed the refresh.
    pub(crate) async fn ensure_fresh_tracked(
        &self,
        client: &Client,
    ) -> APIResult<(String, u64, bool)> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.credentials.access_token_valid_at(Utc::now()) {
            return Ok((token.to_string(), state.generation, false));
        }
        log::info!("Access token missing or expiring, refreshing");
        let (token, generation) = self.refresh_locked(&mut state, client).await?;
        Ok((token, generation, true))
    }

    /// Refreshes unless a newer token than `seen_generation` already exists.
    ///
    /// Used after a 401: whoever observed the rejected token first does the
    /// refresh, later callers pick up its result.
    ///
    /// # Errors
    ///
    /// [`APIError::Auth`] if the token endpoint rejects the refresh.
    pub async fn refresh_if_stale(
        &self,
        client: &Client,
        seen_generation: u64,
    ) -> APIResult<(String, u64)> {
        let mut state = self.state.lock().await;
        if state.generation != seen_generation {
            if let Some(token) = state.credentials.access_token.clone() {
                log::debug!("Token already refreshed by another request");
                return Ok((token, state.generation));
            }
        }
        self.refresh_locked(&mut state, client).await
    }

    /// Unconditionally exchanges the refresh token for a new token pair.
    ///
    /// # Errors
    ///
    /// [`APIError::Auth`] if the token endpoint rejects the refresh.
    pub async fn refresh_access_token(&self, client: &Client) -> APIResult<(String, u64)> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state, client).await
    }

    /// Retries writing rotated credentials that the store refused earlier.
    ///
    /// # Errors
    ///
    /// [`APIError::CredentialPersist`] if the store still refuses the write.
    pub async fn persist_pending(&self) -> APIResult<()> {
        let mut state = self.state.lock().await;
        if !state.unpersisted {
            return Ok(());
        }
        put_secret_json(self.store.as_ref(), &self.secret_name, &state.credentials)
            .await
            .map_err(|source| APIError::CredentialPersist {
                secret: self.secret_name.clone(),
                source,
            })?;
        state.unpersisted = false;
        Ok(())
    }

    pub async fn has_unpersisted_credentials(&self) -> bool {
        self.state.lock().await.unpersisted
    }

    async fn refresh_locked(
        &self,
        state: &mut TokenState,
        client: &Client,
    ) -> APIResult<(String, u64)> {
        let creds = &state.credentials;
        let auth_string = format!("{}:{}", creds.client_id, creds.client_secret);
        let auth_string = base64::engine::general_purpose::STANDARD.encode(auth_string);

        let response = client
            .post(self.context.token_endpoint.clone())
            .header(reqwest::header::AUTHORIZATION, format!("Basic {auth_string}"))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", creds.refresh_token.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("Token refresh failed: {status}");
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    APIError::Auth(format!("token refresh rejected: {status} - {}", body.trim()))
                }
                _ => APIError::from_status(status, &body),
            });
        }

        let AuthTokenResponse {
            access_token,
            refresh_token,
            expires_in,
            x_refresh_token_expires_in,
            ..
        } = response.json().await?;

        let rotated = refresh_token != state.credentials.refresh_token;
        state.credentials.apply_refresh(
            access_token.clone(),
            refresh_token,
            expires_in,
            x_refresh_token_expires_in,
            Utc::now(),
        );
        state.generation += 1;
        log::info!(
            "Successfully refreshed access token{}",
            if rotated { " (refresh token rotated)" } else { "" }
        );

        match put_secret_json(self.store.as_ref(), &self.secret_name, &state.credentials).await {
            Ok(()) => state.unpersisted = false,
            Err(e) => {
                log::error!(
                    "Failed to persist refreshed credentials to '{}', continuing with in-memory tokens: {e}",
                    self.secret_name
                );
                state.unpersisted = true;
            }
        }

        Ok((access_token, state.generation))
    }
}

#[derive(Serialize, Deserialize)]
struct AuthTokenResponse {
    #[serde(default)]
    token_type: String,
    expires_in: u64,
    refresh_token: String,
    #[serde(default)]
    x_refresh_token_expires_in: Option<u64>,
    access_token: String,
}

impl std::ops::Deref for RefreshableQBContext {
    type Target = QBContext;
    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use serde_json::{json, Value};
    use url::Url;
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::RefreshableQBContext;
    use crate::{
        client::{QBContext, RetryPolicy},
        secrets::memory::MemorySecretStore,
        Environment,
    };

    pub(crate) const SECRET: &str = "qbo-credentials";
    pub(crate) const REALM: &str = "9130355";
    pub(crate) const TOKEN_PATH: &str = "/oauth2/v1/tokens/bearer";

    pub(crate) fn blob(access_valid: bool) -> Value {
        let expires_at = if access_valid {
            Utc::now() + Duration::minutes(30)
        } else {
            Utc::now() - Duration::minutes(1)
        };
        json!({
            "client_id": "cid",
            "client_secret": "csecret",
            "realm_id": REALM,
            "refresh_token": "rt-old",
            "access_token": "at-old",
            "access_token_expires_at": expires_at.to_rfc3339(),
            "note": "untouched"
        })
    }

    pub(crate) fn token_body(access: &str, refresh: &str) -> Value {
        json!({
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": refresh,
            "x_refresh_token_expires_in": 8_726_400,
            "access_token": access
        })
    }

    pub(crate) async fn mount_token_endpoint(server: &MockServer, access: &str, refresh: &str) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(access, refresh)))
            .named("token refresh")
            .mount(server)
            .await;
    }

    pub(crate) async fn context(
        server: &MockServer,
        store: Arc<MemorySecretStore>,
    ) -> RefreshableQBContext {
        let base = Url::parse(&format!("{}/v3/", server.uri())).unwrap();
        let token = Url::parse(&format!("{}{TOKEN_PATH}", server.uri())).unwrap();
        RefreshableQBContext::from_store(Environment::SANDBOX, SECRET, store)
            .await
            .unwrap()
            .with_endpoints(base, token)
            .with_retry_policy(RetryPolicy::immediate(3))
    }

    pub(crate) fn bare_context() -> QBContext {
        QBContext::new(Environment::SANDBOX, REALM.into()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::Client;
    use serde_json::json;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::testing::*;
    use crate::{error::APIError, secrets::memory::MemorySecretStore};

    #[tokio::test]
    async fn valid_token_is_used_without_refreshing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let store = Arc::new(MemorySecretStore::with_secret(SECRET, blob(true)));
        let ctx = context(&server, store.clone()).await;

        let (token, generation) = ctx.ensure_fresh(&Client::new()).await.unwrap();
        assert_eq!(token, "at-old");
        assert_eq!(generation, 0);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(header("authorization", "Basic Y2lkOmNzZWNyZXQ="))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-new", "rt-new")))
            .expect(1)
            .mount(&server)
            .await;
        let store = Arc::new(MemorySecretStore::with_secret(SECRET, blob(false)));
        let ctx = context(&server, store.clone()).await;

        let client = Client::new();
        assert_eq!(ctx.ensure_fresh(&client).await.unwrap(), ("at-new".into(), 1));
        // second call sees a valid token
        assert_eq!(ctx.ensure_fresh(&client).await.unwrap(), ("at-new".into(), 1));

        let saved = store.json(SECRET).unwrap();
        assert_eq!(saved["refresh_token"], "rt-new");
        assert_eq!(saved["access_token"], "at-new");
        assert_eq!(saved["note"], "untouched");
        assert!(!ctx.has_unpersisted_credentials().await);
    }

    #[tokio::test]
    async fn rejected_refresh_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
            .expect(1)
            .mount(&server)
            .await;
        let store = Arc::new(MemorySecretStore::with_secret(SECRET, blob(false)));
        let ctx = context(&server, store.clone()).await;

        let err = ctx.ensure_fresh(&Client::new()).await.unwrap_err();
        assert!(matches!(err, APIError::Auth(ref m) if m.contains("invalid_grant")));
        assert_eq!(store.json(SECRET).unwrap()["refresh_token"], "rt-old");
    }

    #[tokio::test]
    async fn failed_persist_keeps_tokens_and_reports_later() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "at-new", "rt-new").await;
        let store = Arc::new(MemorySecretStore::with_secret(SECRET, blob(false)));
        let ctx = context(&server, store.clone()).await;

        store.fail_puts(true);
        let (token, _) = ctx.ensure_fresh(&Client::new()).await.unwrap();
        assert_eq!(token, "at-new");
        assert_eq!(ctx.credentials().await.refresh_token, "rt-new");
        assert!(ctx.has_unpersisted_credentials().await);

        let err = ctx.persist_pending().await.unwrap_err();
        assert!(matches!(err, APIError::CredentialPersist { ref secret, .. } if secret == SECRET));

        store.fail_puts(false);
        ctx.persist_pending().await.unwrap();
        assert_eq!(store.json(SECRET).unwrap()["refresh_token"], "rt-new");
        assert!(!ctx.has_unpersisted_credentials().await);
    }

    #[tokio::test]
    async fn stale_generation_skips_the_second_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-new", "rt-new")))
            .expect(1)
            .mount(&server)
            .await;
        let store = Arc::new(MemorySecretStore::with_secret(SECRET, blob(true)));
        let ctx = context(&server, store).await;
        let client = Client::new();

        let (first, second) = tokio::join!(
            ctx.refresh_if_stale(&client, 0),
            ctx.refresh_if_stale(&client, 0)
        );
        assert_eq!(first.unwrap(), ("at-new".into(), 1));
        assert_eq!(second.unwrap(), ("at-new".into(), 1));
    }

    #[test]
    fn incomplete_blob_is_rejected() {
        let mut value = blob(true);
        value["client_secret"] = json!("");
        let creds = serde_json::from_value(value).unwrap();
        let result = super::RefreshableQBContext::new(
            bare_context(),
            creds,
            SECRET,
            Arc::new(MemorySecretStore::default()),
        );
        assert!(matches!(result, Err(APIError::MissingCredential("client_secret"))));
    }
}
