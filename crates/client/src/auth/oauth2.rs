//! OAuth2 token lifecycle: authorization URL, code exchange, refresh with
//! single-flight deduplication, client-credentials fetch.
//!
//! Tokens are persisted through a [`TokenStorage`] backend under
//! `oauth2_{client_id}`. A token counts as expiring when it has less than
//! [`EXPIRY_BUFFER`] of life left; `apply` then refreshes it before the
//! request goes out. Concurrent refreshes collapse into one token-endpoint
//! call: the first caller installs a shared future in the handler's slot and
//! everyone else awaits a clone of it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::session::RequestConfig;
use crate::storage::{MemoryStorage, TokenStorage};

use super::pkce;
use super::types::{AuthorizationRequest, GrantFlow, OAuth2Config, TokenEndpointResponse, TokenRecord};
use super::AuthHandler;

/// Tokens with less life than this are refreshed before use.
const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

type RefreshFuture = Shared<BoxFuture<'static, Result<TokenRecord, AuthError>>>;

/// OAuth2 auth handler. Cloning shares the token lifecycle and the
/// single-flight slot.
#[derive(Clone)]
pub struct OAuth2Auth {
    inner: Arc<Inner>,
}

struct Inner {
    config: OAuth2Config,
    storage: Arc<dyn TokenStorage>,
    storage_key: String,
    http: reqwest::Client,
    /// At most one in-flight refresh per handler; holds the shared future
    /// concurrent callers attach to.
    refresh_slot: Mutex<Option<RefreshFuture>>,
}

/// Which lifecycle operation a token-endpoint call serves, for error
/// classification.
#[derive(Clone, Copy)]
enum TokenRequestKind {
    Exchange,
    Refresh,
}

impl TokenRequestKind {
    fn error(self, message: String) -> AuthError {
        match self {
            TokenRequestKind::Exchange => AuthError::TokenExchange(message),
            TokenRequestKind::Refresh => AuthError::TokenRefresh(message),
        }
    }
}

impl OAuth2Auth {
    /// Handler with in-memory token storage.
    ///
    /// # Errors
    /// [`AuthError::InvalidInput`] if the HTTP client cannot be initialized.
    pub fn new(config: OAuth2Config) -> Result<Self, AuthError> {
        Self::with_storage(config, Arc::new(MemoryStorage::new()))
    }

    /// Handler persisting tokens through `storage`.
    ///
    /// # Errors
    /// [`AuthError::InvalidInput`] if the HTTP client cannot be initialized.
    pub fn with_storage(
        config: OAuth2Config,
        storage: Arc<dyn TokenStorage>,
    ) -> Result<Self, AuthError> {
        let storage_key = format!("oauth2_{}", config.client_id);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AuthError::InvalidInput(format!("could not initialize HTTP client: {e}"))
            })?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                storage,
                storage_key,
                http,
                refresh_slot: Mutex::new(None),
            }),
        })
    }

    /// The storage key this handler reads and writes.
    #[must_use]
    pub fn storage_key(&self) -> &str {
        &self.inner.storage_key
    }

    /// Build the authorization URL for the user agent.
    ///
    /// PKCE is included when the client has no secret or when
    /// `use_pkce: Some(true)`; the returned verifier must be held by the
    /// caller and passed to [`exchange_code`](Self::exchange_code).
    pub fn authorization_request(
        &self,
        state: Option<&str>,
    ) -> Result<AuthorizationRequest, AuthError> {
        self.inner.ensure_flow_supported()?;
        let config = &self.inner.config;

        let mut query = format!(
            "client_id={}&response_type=code&redirect_uri={}",
            urlencoding::encode(&config.client_id),
            urlencoding::encode(&config.redirect_uri),
        );
        if let Some(scope) = config.scope_string() {
            query.push_str(&format!("&scope={}", urlencoding::encode(&scope)));
        }
        if let Some(state) = state {
            query.push_str(&format!("&state={}", urlencoding::encode(state)));
        }

        let code_verifier = if config.pkce_enabled() {
            let verifier = pkce::generate_code_verifier();
            // The challenge alphabet is already URL-safe.
            query.push_str(&format!(
                "&code_challenge={}&code_challenge_method=S256",
                pkce::code_challenge(&verifier)
            ));
            Some(verifier)
        } else {
            None
        };

        let separator = if config.authorization_url.contains('?') { '&' } else { '?' };
        Ok(AuthorizationRequest {
            url: format!("{}{}{}", config.authorization_url, separator, query),
            code_verifier,
        })
    }

    /// Exchange an authorization code for tokens and persist them.
    ///
    /// # Errors
    /// [`AuthError::TokenExchange`] when the token endpoint rejects the code.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenRecord, AuthError> {
        self.inner.ensure_flow_supported()?;
        let config = &self.inner.config;

        let mut params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", config.redirect_uri.clone()),
            ("client_id", config.client_id.clone()),
        ];
        if let Some(secret) = &config.client_secret {
            params.push(("client_secret", secret.clone()));
        }
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier.to_string()));
        }

        let record = self
            .inner
            .request_token(&params, TokenRequestKind::Exchange)
            .await?;
        self.inner
            .storage
            .set(&self.inner.storage_key, record.clone(), None)
            .await?;
        info!(client_id = %config.client_id, "authorization code exchanged");
        Ok(record)
    }

    /// Refresh the stored tokens, deduplicating concurrent calls.
    ///
    /// # Errors
    /// [`AuthError::TokenRefresh`] when no refresh token is stored or the
    /// endpoint rejects the grant; the stale record is left in storage.
    pub async fn refresh_tokens(&self) -> Result<TokenRecord, AuthError> {
        self.inner.ensure_flow_supported()?;
        Inner::refresh_single_flight(&self.inner).await
    }

    /// Whether storage currently holds a token outside the expiry buffer.
    pub async fn has_valid_token(&self) -> Result<bool, AuthError> {
        self.inner.ensure_flow_supported()?;
        let record = self.inner.storage.get(&self.inner.storage_key).await?;
        Ok(record.is_some_and(|r| !r.expires_within(EXPIRY_BUFFER)))
    }

    /// Drop the stored tokens.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.inner.storage.clear(&self.inner.storage_key).await?;
        debug!(key = %self.inner.storage_key, "stored tokens cleared");
        Ok(())
    }
}

impl Inner {
    fn ensure_flow_supported(&self) -> Result<(), AuthError> {
        match self.config.flow {
            GrantFlow::Password => Err(AuthError::UnsupportedFlow(
                "resource-owner password grant is not supported".to_string(),
            )),
            GrantFlow::AuthorizationCode | GrantFlow::ClientCredentials => Ok(()),
        }
    }

    /// Join the in-flight refresh, or start one. The future clears the slot
    /// itself, success or failure, so the next expiry starts fresh.
    fn refresh_single_flight(self: &Arc<Self>) -> RefreshFuture {
        let mut slot = self.refresh_slot.lock();
        if let Some(in_flight) = slot.as_ref() {
            debug!("joining in-flight token refresh");
            return in_flight.clone();
        }

        let inner = Arc::clone(self);
        let future: RefreshFuture = async move {
            let result = inner.do_refresh().await;
            *inner.refresh_slot.lock() = None;
            result
        }
        .boxed()
        .shared();
        *slot = Some(future.clone());
        future
    }

    async fn do_refresh(&self) -> Result<TokenRecord, AuthError> {
        let current = self.storage.get(&self.storage_key).await?;
        let Some(refresh_token) = current.as_ref().and_then(|r| r.refresh_token.clone()) else {
            return Err(AuthError::TokenRefresh("no refresh token in storage".to_string()));
        };

        let mut params = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.clone()),
            ("client_id", self.config.client_id.clone()),
        ];
        if let Some(secret) = &self.config.client_secret {
            params.push(("client_secret", secret.clone()));
        }

        let mut record = self.request_token(&params, TokenRequestKind::Refresh).await?;
        // Providers that do not rotate omit the refresh token; keep the old
        // one so the next refresh still works.
        if record.refresh_token.is_none() {
            record.refresh_token = Some(refresh_token);
        }
        self.storage.set(&self.storage_key, record.clone(), None).await?;
        info!(client_id = %self.config.client_id, "access token refreshed");
        Ok(record)
    }

    async fn fetch_client_credentials(&self) -> Result<TokenRecord, AuthError> {
        let Some(secret) = &self.config.client_secret else {
            return Err(AuthError::InvalidInput(
                "client_credentials flow requires a client secret".to_string(),
            ));
        };

        let mut params = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.config.client_id.clone()),
            ("client_secret", secret.clone()),
        ];
        if let Some(scope) = self.config.scope_string() {
            params.push(("scope", scope));
        }

        let record = self.request_token(&params, TokenRequestKind::Exchange).await?;
        self.storage.set(&self.storage_key, record.clone(), None).await?;
        info!(client_id = %self.config.client_id, "client_credentials grant completed");
        Ok(record)
    }

    /// Form-POST the token endpoint and parse the response.
    async fn request_token(
        &self,
        params: &[(&str, String)],
        kind: TokenRequestKind,
    ) -> Result<TokenRecord, AuthError> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| kind.error(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "token endpoint rejected the request");
            return Err(kind.error(format!("HTTP {status}: {body}")));
        }

        let parsed: TokenEndpointResponse = response
            .json()
            .await
            .map_err(|e| kind.error(format!("unparseable token response: {e}")))?;
        Ok(parsed.into())
    }
}

#[async_trait]
impl AuthHandler for OAuth2Auth {
    async fn apply(&self, mut config: RequestConfig) -> Result<RequestConfig, AuthError> {
        self.inner.ensure_flow_supported()?;

        let stored = self.inner.storage.get(&self.inner.storage_key).await?;
        let record = match stored {
            Some(record) if !record.expires_within(EXPIRY_BUFFER) => Some(record),
            Some(record) if record.refresh_token.is_some() => {
                Some(Inner::refresh_single_flight(&self.inner).await?)
            }
            _ if self.inner.config.flow == GrantFlow::ClientCredentials => {
                Some(self.inner.fetch_client_credentials().await?)
            }
            _ => {
                debug!("no usable token, proceeding unauthenticated");
                None
            }
        };

        if let Some(record) = record {
            let value = HeaderValue::from_str(&format!("Bearer {}", record.access_token))
                .map_err(|_| {
                    AuthError::InvalidInput("access token is not a valid header value".to_string())
                })?;
            config.headers.insert(AUTHORIZATION, value);
        }
        Ok(config)
    }
}
