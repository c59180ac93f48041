//! OAuth2 configuration and token data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored credential set, only ever produced by a successful token-endpoint
/// exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absent means the token never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenRecord {
    /// Whether the token expires within `buffer` from now. Tokens without an
    /// expiry never report as expiring.
    #[must_use]
    pub fn expires_within(&self, buffer: std::time::Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let buffer = chrono::Duration::milliseconds(buffer.as_millis() as i64);
                Utc::now() + buffer >= expires_at
            }
            None => false,
        }
    }
}

/// Wire shape of a token-endpoint success response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenEndpointResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
}

impl From<TokenEndpointResponse> for TokenRecord {
    fn from(resp: TokenEndpointResponse) -> Self {
        TokenRecord {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            expires_at: resp.expires_in.map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
            token_type: resp.token_type,
            scope: resp.scope,
        }
    }
}

/// Which OAuth2 grant the handler drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantFlow {
    /// Authorization-code flow, optionally with PKCE.
    AuthorizationCode,
    /// Machine-to-machine grant; requires a client secret.
    ClientCredentials,
    /// Resource-owner password grant. Present so configs can express it, but
    /// rejected before any network or storage access.
    Password,
}

/// OAuth2 provider endpoints and client identity.
#[derive(Debug, Clone)]
pub struct OAuth2Config {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub authorization_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Force PKCE on or off. Unset, PKCE is enabled exactly when there is no
    /// client secret (public client).
    pub use_pkce: Option<bool>,
    pub flow: GrantFlow,
}

impl OAuth2Config {
    #[must_use]
    pub(crate) fn pkce_enabled(&self) -> bool {
        self.use_pkce.unwrap_or(self.client_secret.is_none())
    }

    #[must_use]
    pub(crate) fn scope_string(&self) -> Option<String> {
        if self.scopes.is_empty() {
            None
        } else {
            Some(self.scopes.join(" "))
        }
    }
}

/// An authorization URL ready for the user agent, plus the PKCE verifier the
/// caller must hold for the code exchange.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    /// Present only when PKCE is in play.
    pub code_verifier: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(expires_at: Option<DateTime<Utc>>) -> TokenRecord {
        TokenRecord {
            access_token: "at".to_string(),
            refresh_token: None,
            expires_at,
            token_type: "Bearer".to_string(),
            scope: None,
        }
    }

    #[test]
    fn no_expiry_never_expires() {
        assert!(!record(None).expires_within(Duration::from_secs(60)));
    }

    #[test]
    fn expiry_buffer_applies() {
        // 30s of life left, 60s buffer: counts as expiring.
        let soon = Utc::now() + chrono::Duration::seconds(30);
        assert!(record(Some(soon)).expires_within(Duration::from_secs(60)));

        // 10 minutes left: healthy.
        let later = Utc::now() + chrono::Duration::minutes(10);
        assert!(!record(Some(later)).expires_within(Duration::from_secs(60)));

        // Already past: expiring regardless of buffer.
        let past = Utc::now() - chrono::Duration::seconds(5);
        assert!(record(Some(past)).expires_within(Duration::ZERO));
    }

    #[test]
    fn endpoint_response_maps_expiry() {
        let resp = TokenEndpointResponse {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_in: Some(3600),
            token_type: "Bearer".to_string(),
            scope: Some("read".to_string()),
        };
        let record = TokenRecord::from(resp);
        let expires_at = record.expires_at.expect("expiry set");
        let lifetime = expires_at - Utc::now();
        assert!(lifetime > chrono::Duration::seconds(3590));
        assert!(lifetime <= chrono::Duration::seconds(3600));
        assert_eq!(record.refresh_token.as_deref(), Some("rt"));
    }

    #[test]
    fn endpoint_response_defaults() {
        let resp: TokenEndpointResponse =
            serde_json::from_str(r#"{"access_token": "at"}"#).unwrap();
        let record = TokenRecord::from(resp);
        assert_eq!(record.token_type, "Bearer");
        assert!(record.expires_at.is_none());
        assert!(record.refresh_token.is_none());
    }

    #[test]
    fn record_roundtrips_through_json() {
        let original = TokenRecord {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_at: Some(Utc::now()),
            token_type: "Bearer".to_string(),
            scope: Some("read write".to_string()),
        };
        let json = serde_json::to_string(&original).unwrap();
        let restored: TokenRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn pkce_defaults_to_public_client_detection() {
        let mut config = OAuth2Config {
            client_id: "app".to_string(),
            client_secret: None,
            authorization_url: "https://id.example.com/authorize".to_string(),
            token_url: "https://id.example.com/token".to_string(),
            redirect_uri: "https://app.example.com/callback".to_string(),
            scopes: vec![],
            use_pkce: None,
            flow: GrantFlow::AuthorizationCode,
        };
        assert!(config.pkce_enabled());

        config.client_secret = Some("secret".to_string());
        assert!(!config.pkce_enabled());

        config.use_pkce = Some(true);
        assert!(config.pkce_enabled());
    }

    #[test]
    fn scope_string_joins_with_spaces() {
        let mut config = OAuth2Config {
            client_id: "app".to_string(),
            client_secret: None,
            authorization_url: String::new(),
            token_url: String::new(),
            redirect_uri: String::new(),
            scopes: vec!["read".to_string(), "write".to_string()],
            use_pkce: None,
            flow: GrantFlow::AuthorizationCode,
        };
        assert_eq!(config.scope_string().as_deref(), Some("read write"));
        config.scopes.clear();
        assert!(config.scope_string().is_none());
    }
}
