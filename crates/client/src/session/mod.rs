//! The request engine: session defaults, request preparation, auth
//! application, and the retry loop.
//!
//! A [`Session`] wraps one shared `reqwest::Client`. Each call merges its
//! [`RequestOptions`] over the session defaults into a [`RequestConfig`],
//! hands the config to the auth handler (if any), then drives the retry loop:
//! per-attempt timeout raced with the send, retryable classification (5xx,
//! 429, transport failures), exponential backoff with jitter between
//! attempts.

mod config;
mod response;
pub(crate) mod retry;

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Method;
use tracing::{debug, warn};
use url::Url;

use crate::auth::AuthHandler;
use crate::error::{ClientError, ClientResult, NetworkCause};

pub use config::{Body, RequestConfig, RequestOptions};
pub use response::Response;
pub use retry::{JitterSource, RetryPolicy, ThreadRngJitter};

const DEFAULT_USER_AGENT: &str = concat!("riptide/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Session-wide defaults merged under every request.
struct SessionDefaults {
    base_url: Option<Url>,
    headers: HeaderMap,
    timeout: Option<Duration>,
    retry: RetryPolicy,
    auth: Option<Arc<dyn AuthHandler>>,
}

/// An HTTP session: shared transport, defaults, and the retry engine.
///
/// Cheap to clone is not a goal here; share a `Session` behind an `Arc` if
/// multiple tasks need it. All methods take `&self`.
pub struct Session {
    http: reqwest::Client,
    defaults: SessionDefaults,
    jitter: Arc<dyn JitterSource>,
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    base_url: Option<String>,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
    retry: RetryPolicy,
    auth: Option<Arc<dyn AuthHandler>>,
    jitter: Arc<dyn JitterSource>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            base_url: None,
            headers: Vec::new(),
            timeout: Some(DEFAULT_TIMEOUT),
            retry: RetryPolicy::disabled(),
            auth: None,
            jitter: Arc::new(ThreadRngJitter),
        }
    }
}

impl SessionBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Base URL that relative request paths resolve against.
    #[must_use]
    pub fn base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = Some(base.into());
        self
    }

    /// Add a default header sent with every request (per-call headers with
    /// the same name win).
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Default per-attempt timeout. `None` disables the timeout race.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Default retry policy. Sessions start with retries disabled.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Default auth handler applied to every request.
    #[must_use]
    pub fn auth(mut self, handler: Arc<dyn AuthHandler>) -> Self {
        self.auth = Some(handler);
        self
    }

    /// Replace the backoff jitter source. Tests pin this to a fixed factor.
    #[must_use]
    pub fn jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Validate and build the session.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidConfiguration`] for an unparseable base
    /// URL or malformed default headers.
    pub fn build(self) -> ClientResult<Session> {
        let base_url = match self.base_url {
            Some(raw) => Some(Url::parse(&raw).map_err(|e| {
                ClientError::InvalidConfiguration(format!("invalid base_url {raw:?}: {e}"))
            })?),
            None => None,
        };

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        merge_headers(&mut headers, &self.headers).map_err(ClientError::InvalidConfiguration)?;

        let http = reqwest::Client::builder()
            .connect_timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| {
                ClientError::InvalidConfiguration(format!("could not initialize HTTP client: {e}"))
            })?;

        Ok(Session {
            http,
            defaults: SessionDefaults {
                base_url,
                headers,
                timeout: self.timeout,
                retry: self.retry,
                auth: self.auth,
            },
            jitter: self.jitter,
        })
    }
}

impl Session {
    /// Start building a session.
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Execute a request with full control over the options.
    ///
    /// This is the single entry point behind the verb helpers; see the module
    /// docs for the merge and retry semantics.
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> ClientResult<Response> {
        let auth = options.auth.clone().or_else(|| self.defaults.auth.clone());
        let mut config = self.prepare(method, url, options)?;

        if let Some(handler) = auth {
            config = handler.apply(config).await?;
        }

        config::apply_query_params(&mut config.url, &config.params);
        self.send_with_retry(config).await
    }

    /// Resolve the URL and merge options over the session defaults.
    fn prepare(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> ClientResult<RequestConfig> {
        let url = self.resolve_url(url)?;

        let mut headers = self.defaults.headers.clone();
        merge_headers(&mut headers, &options.headers).map_err(ClientError::InvalidRequest)?;

        Ok(RequestConfig {
            method,
            url,
            headers,
            params: options.params,
            body: options.body,
            timeout: options.timeout.or(self.defaults.timeout),
            retry: options.retry.unwrap_or_else(|| self.defaults.retry.clone()),
        })
    }

    fn resolve_url(&self, raw: &str) -> ClientResult<Url> {
        match Url::parse(raw) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.defaults.base_url {
                Some(base) => base.join(raw).map_err(|e| {
                    ClientError::InvalidRequest(format!("cannot resolve {raw:?} against base: {e}"))
                }),
                None => Err(ClientError::InvalidRequest(format!(
                    "relative URL {raw:?} requires a session base_url"
                ))),
            },
            Err(e) => Err(ClientError::InvalidRequest(format!("invalid URL {raw:?}: {e}"))),
        }
    }

    async fn send_with_retry(&self, config: RequestConfig) -> ClientResult<Response> {
        let max_attempts = config.retry.max_attempts();
        let mut attempt: u32 = 1;

        loop {
            debug!(
                method = %config.method,
                url = %config.url,
                attempt,
                max_attempts,
                "sending request"
            );
            let outcome = self.send_once(&config).await;

            let retryable = match &outcome {
                Ok(resp) => is_retryable_status(resp.status()),
                Err(_) => true,
            };

            if retryable && attempt < max_attempts {
                let delay = config.retry.backoff_delay(attempt + 1, self.jitter.factor());
                match &outcome {
                    Ok(resp) => warn!(
                        status = %resp.status(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retryable status, backing off"
                    ),
                    Err(cause) => warn!(
                        error = %cause,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transport failure, backing off"
                    ),
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return match outcome {
                Ok(resp) if resp.status().is_success() => Ok(resp),
                Ok(resp) => Err(ClientError::Http {
                    status: resp.status(),
                    config: Box::new(config),
                    response: resp,
                }),
                Err(source) => Err(ClientError::Network {
                    attempts: attempt,
                    config: Box::new(config),
                    source,
                }),
            };
        }
    }

    /// One send attempt, raced against the per-attempt timeout.
    async fn send_once(&self, config: &RequestConfig) -> Result<Response, NetworkCause> {
        let mut request = self
            .http
            .request(config.method.clone(), config.url.clone())
            .headers(config.headers.clone());

        request = match &config.body {
            Body::Empty => request,
            Body::Json(value) => request.json(value),
            Body::Raw(bytes) => request.body(bytes.clone()),
        };

        let send = async {
            let resp = request.send().await.map_err(NetworkCause::Transport)?;
            Response::from_reqwest(resp).await
        };

        match config.timeout {
            Some(limit) => match tokio::time::timeout(limit, send).await {
                Ok(result) => result,
                Err(_) => Err(NetworkCause::Timeout(limit)),
            },
            None => send.await,
        }
    }

    /// `GET` the given URL.
    pub async fn get(&self, url: &str, options: RequestOptions) -> ClientResult<Response> {
        self.execute(Method::GET, url, options).await
    }

    /// `POST` a JSON body.
    pub async fn post(
        &self,
        url: &str,
        body: serde_json::Value,
        options: RequestOptions,
    ) -> ClientResult<Response> {
        self.execute(Method::POST, url, options.json(body)).await
    }

    /// `PUT` a JSON body.
    pub async fn put(
        &self,
        url: &str,
        body: serde_json::Value,
        options: RequestOptions,
    ) -> ClientResult<Response> {
        self.execute(Method::PUT, url, options.json(body)).await
    }

    /// `PATCH` a JSON body.
    pub async fn patch(
        &self,
        url: &str,
        body: serde_json::Value,
        options: RequestOptions,
    ) -> ClientResult<Response> {
        self.execute(Method::PATCH, url, options.json(body)).await
    }

    /// `DELETE` the given URL.
    pub async fn delete(&self, url: &str, options: RequestOptions) -> ClientResult<Response> {
        self.execute(Method::DELETE, url, options).await
    }

    /// `HEAD` the given URL.
    pub async fn head(&self, url: &str, options: RequestOptions) -> ClientResult<Response> {
        self.execute(Method::HEAD, url, options).await
    }
}

/// 5xx and 429 are worth another attempt; every other status is terminal.
fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// Parse and insert string header pairs, later entries replacing earlier
/// ones. `HeaderMap` matches names case-insensitively.
fn merge_headers(target: &mut HeaderMap, pairs: &[(String, String)]) -> Result<(), String> {
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| format!("invalid header name {name:?}: {e}"))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| format!("invalid header value for {name:?}: {e}"))?;
        target.insert(name, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        use reqwest::StatusCode;
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::OK));
    }

    #[test]
    fn header_merge_is_case_insensitive_and_later_wins() {
        let mut headers = HeaderMap::new();
        merge_headers(
            &mut headers,
            &[("X-Token".to_string(), "one".to_string())],
        )
        .unwrap();
        merge_headers(
            &mut headers,
            &[("x-token".to_string(), "two".to_string())],
        )
        .unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("X-TOKEN").unwrap(), "two");
    }

    #[test]
    fn header_merge_rejects_bad_values() {
        let mut headers = HeaderMap::new();
        let err = merge_headers(
            &mut headers,
            &[("X-Bad".to_string(), "line\nbreak".to_string())],
        );
        assert!(err.is_err());
    }

    #[test]
    fn relative_url_requires_base() {
        let session = Session::builder().build().unwrap();
        let err = session.resolve_url("/v1/items").unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }

    #[test]
    fn relative_url_joins_base() {
        let session = Session::builder()
            .base_url("https://api.example.com/v1/")
            .build()
            .unwrap();
        let url = session.resolve_url("items/42").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/items/42");
    }

    #[test]
    fn absolute_url_ignores_base() {
        let session = Session::builder()
            .base_url("https://api.example.com/")
            .build()
            .unwrap();
        let url = session.resolve_url("https://other.example.com/x").unwrap();
        assert_eq!(url.host_str(), Some("other.example.com"));
    }

    #[test]
    fn per_call_options_override_defaults() {
        let session = Session::builder()
            .header("X-Env", "prod")
            .timeout(Some(Duration::from_secs(10)))
            .build()
            .unwrap();
        let config = session
            .prepare(
                Method::GET,
                "https://api.example.com/",
                RequestOptions::new()
                    .header("X-Env", "staging")
                    .timeout(Duration::from_secs(2)),
            )
            .unwrap();
        assert_eq!(config.headers.get("x-env").unwrap(), "staging");
        assert_eq!(config.timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.retry.max_attempts(), 1);
    }

    #[test]
    fn default_headers_present() {
        let session = Session::builder().build().unwrap();
        let config = session
            .prepare(Method::GET, "https://api.example.com/", RequestOptions::new())
            .unwrap();
        assert!(config.headers.get(USER_AGENT).is_some());
        assert_eq!(config.headers.get(ACCEPT).unwrap(), "application/json");
    }
}
