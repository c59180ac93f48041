//! Stateless header-injecting auth handlers.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};

use crate::error::AuthError;
use crate::session::RequestConfig;

use super::AuthHandler;

/// `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct BearerAuth {
    token: String,
}

impl BearerAuth {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl AuthHandler for BearerAuth {
    async fn apply(&self, mut config: RequestConfig) -> Result<RequestConfig, AuthError> {
        let value = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|_| AuthError::InvalidInput("bearer token is not a valid header value".to_string()))?;
        config.headers.insert(AUTHORIZATION, value);
        Ok(config)
    }
}

/// API key sent in a configurable header, `X-API-Key` by default.
#[derive(Debug, Clone)]
pub struct ApiKeyAuth {
    key: String,
    header_name: String,
}

impl ApiKeyAuth {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), header_name: "X-API-Key".to_string() }
    }

    /// Use a different header name.
    #[must_use]
    pub fn with_header(mut self, header_name: impl Into<String>) -> Self {
        self.header_name = header_name.into();
        self
    }
}

#[async_trait]
impl AuthHandler for ApiKeyAuth {
    async fn apply(&self, mut config: RequestConfig) -> Result<RequestConfig, AuthError> {
        let name = HeaderName::from_bytes(self.header_name.as_bytes()).map_err(|_| {
            AuthError::InvalidInput(format!("invalid API key header name {:?}", self.header_name))
        })?;
        let value = HeaderValue::from_str(&self.key)
            .map_err(|_| AuthError::InvalidInput("API key is not a valid header value".to_string()))?;
        config.headers.insert(name, value);
        Ok(config)
    }
}

/// HTTP Basic: `Authorization: Basic base64(username:password)`.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl BasicAuth {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }
}

#[async_trait]
impl AuthHandler for BasicAuth {
    async fn apply(&self, mut config: RequestConfig) -> Result<RequestConfig, AuthError> {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password));
        let value = HeaderValue::from_str(&format!("Basic {encoded}"))
            .map_err(|_| AuthError::InvalidInput("basic credentials are not header-safe".to_string()))?;
        config.headers.insert(AUTHORIZATION, value);
        Ok(config)
    }
}
