//! Error types for the request engine, the auth subsystem, and token storage.
//!
//! The taxonomy follows the retry classification: `Network` is always
//! retryable, `Http` is retryable only for 5xx/429, and everything in
//! [`AuthError`] is terminal (token-endpoint failures are surfaced to the
//! `apply()` caller, never retried by the engine).
//!
//! [`AuthError`] and [`StorageError`] are `Clone`: concurrent callers attached
//! to a single in-flight token refresh all receive the identical failure.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

use crate::session::{RequestConfig, Response};

/// Result alias used throughout the request engine.
pub type ClientResult<T> = Result<T, ClientError>;

/// Top-level error returned by [`Session`](crate::session::Session)
/// operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (connection, DNS, timeout) that survived every
    /// configured retry attempt.
    #[error("network error after {attempts} attempt(s): {source}")]
    Network {
        /// Number of send attempts made before giving up.
        attempts: u32,
        /// The merged request description for diagnostics.
        config: Box<RequestConfig>,
        #[source]
        source: NetworkCause,
    },

    /// The server answered with a terminal non-2xx status.
    ///
    /// Retryable statuses (5xx, 429) only end up here once attempts are
    /// exhausted; any other non-2xx status is terminal on the first response.
    #[error("request failed with status {status}")]
    Http {
        status: StatusCode,
        /// The merged request description for diagnostics.
        config: Box<RequestConfig>,
        /// The buffered terminal response.
        response: Response,
    },

    /// Authentication failed while preparing the request.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The request could not be constructed (bad URL, invalid header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A session or retry-policy setting is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The response body could not be decoded into the requested type.
    #[error("failed to decode response body: {0}")]
    Decode(String),
}

/// Underlying cause of a [`ClientError::Network`] failure.
#[derive(Debug, Error)]
pub enum NetworkCause {
    /// The HTTP transport reported an error (DNS, connect, reset, TLS).
    #[error("transport failure: {0}")]
    Transport(#[source] reqwest::Error),

    /// The per-attempt timer fired before the send completed.
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors raised by [`AuthHandler::apply`](crate::auth::AuthHandler::apply)
/// and the OAuth2 token lifecycle.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The authorization-code exchange was rejected by the token endpoint.
    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// The refresh grant was rejected by the token endpoint. The stale record
    /// is left in storage so the caller can fall back to a fresh
    /// authorization-code flow.
    #[error("token refresh failed: {0}")]
    TokenRefresh(String),

    /// The configured grant flow is disabled or unknown. Raised before any
    /// network call is attempted.
    #[error("unsupported OAuth2 flow: {0}")]
    UnsupportedFlow(String),

    /// Handler input cannot be turned into a valid header or form field.
    #[error("invalid auth input: {0}")]
    InvalidInput(String),

    /// Token storage failed underneath the handler.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors raised by [`TokenStorage`](crate::storage::TokenStorage) backends.
///
/// Read-side corruption (unparseable document, malformed ciphertext framing)
/// degrades to "no token" inside the backends and never surfaces here; the
/// exception is [`StorageError::Decrypt`], which indicates an encryption-key
/// mismatch operators need to see.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Filesystem-level failure reading or writing the token document.
    #[error("token storage I/O error: {0}")]
    Io(String),

    /// A record could not be serialized for persistence.
    #[error("token storage serialization error: {0}")]
    Serialization(String),

    /// A value could not be encrypted for persistence.
    #[error("token storage encryption error: {0}")]
    Encrypt(String),

    /// Well-formed ciphertext failed to decrypt: the derived key does not
    /// match the stored data (moved file, changed platform, wrong
    /// passphrase).
    #[error("stored token for {key:?} failed to decrypt; encryption key does not match the store")]
    Decrypt { key: String },
}

#[cfg(test)]
mod tests {
    //! Unit tests for the error taxonomy.
    use super::*;

    #[test]
    fn auth_errors_are_cloneable() {
        // Single-flight waiters share one refresh outcome, so every variant
        // must clone.
        let err = AuthError::TokenRefresh("HTTP 400".to_string());
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());

        let err = AuthError::Storage(StorageError::Decrypt { key: "oauth2_app".to_string() });
        assert!(err.clone().to_string().contains("oauth2_app"));
    }

    #[test]
    fn decrypt_error_names_the_key() {
        let err = StorageError::Decrypt { key: "oauth2_client".to_string() };
        let msg = err.to_string();
        assert!(msg.contains("oauth2_client"));
        assert!(msg.contains("key does not match"));
    }

    #[test]
    fn network_cause_display() {
        let cause = NetworkCause::Timeout(Duration::from_millis(250));
        assert!(cause.to_string().contains("250ms"));
    }
}
