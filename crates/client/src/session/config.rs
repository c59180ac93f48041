//! Per-request options and the merged request description.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Method;
use url::Url;

use crate::auth::AuthHandler;
use crate::session::retry::RetryPolicy;

/// Request body, exclusive by construction.
#[derive(Debug, Clone, Default)]
pub enum Body {
    /// No body is sent.
    #[default]
    Empty,
    /// Serialized as JSON; sets `Content-Type: application/json`.
    Json(serde_json::Value),
    /// Sent verbatim with no content-type assumption.
    Raw(Vec<u8>),
}

impl Body {
    /// Whether any payload would be sent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// Per-call options layered over the session defaults.
///
/// Headers and query parameters are kept as ordered pairs here; they are
/// merged into the session defaults (later wins, case-insensitive for
/// headers) when the request is prepared.
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) params: Vec<(String, String)>,
    pub(crate) body: Body,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) auth: Option<Arc<dyn AuthHandler>>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header, overriding any session default with the same name.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a query parameter, overwriting any same-named parameter already
    /// present in the URL.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Send a JSON body.
    #[must_use]
    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    /// Send raw bytes as the body.
    #[must_use]
    pub fn body(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.body = Body::Raw(bytes.into());
        self
    }

    /// Override the per-attempt timeout for this call.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the retry policy for this call.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Authenticate this call with the given handler, overriding the session
    /// default.
    #[must_use]
    pub fn auth(mut self, handler: Arc<dyn AuthHandler>) -> Self {
        self.auth = Some(handler);
        self
    }
}

impl std::fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOptions")
            .field("headers", &self.headers)
            .field("params", &self.params)
            .field("body", &self.body)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("auth", &self.auth.as_ref().map(|_| "<handler>"))
            .finish()
    }
}

/// The fully merged description of one request, as handed to auth handlers
/// and carried inside terminal errors for diagnostics.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub params: Vec<(String, String)>,
    pub body: Body,
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

/// Set `params` on `url`, overwriting any existing parameter with the same
/// name and preserving the rest.
pub(crate) fn apply_query_params(url: &mut Url, params: &[(String, String)]) {
    if params.is_empty() {
        return;
    }
    let overridden: Vec<&str> = params.iter().map(|(k, _)| k.as_str()).collect();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !overridden.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut pairs = url.query_pairs_mut();
    pairs.clear();
    for (k, v) in &kept {
        pairs.append_pair(k, v);
    }
    for (k, v) in params {
        pairs.append_pair(k, v);
    }
    drop(pairs);

    if url.query() == Some("") {
        url.set_query(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_defaults_to_empty() {
        assert!(Body::default().is_empty());
        assert!(!Body::Json(serde_json::json!({"a": 1})).is_empty());
    }

    #[test]
    fn options_accumulate() {
        let opts = RequestOptions::new()
            .header("X-Trace", "abc")
            .query("page", "2")
            .query("limit", "50")
            .timeout(Duration::from_secs(5));
        assert_eq!(opts.headers.len(), 1);
        assert_eq!(opts.params.len(), 2);
        assert_eq!(opts.timeout, Some(Duration::from_secs(5)));
        assert!(opts.retry.is_none());
    }

    #[test]
    fn query_params_overwrite_existing() {
        let mut url = Url::parse("https://api.example.com/items?page=1&sort=asc").unwrap();
        apply_query_params(
            &mut url,
            &[("page".to_string(), "3".to_string())],
        );
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("sort".to_string(), "asc".to_string())));
        assert!(pairs.contains(&("page".to_string(), "3".to_string())));
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn query_params_append_new() {
        let mut url = Url::parse("https://api.example.com/items").unwrap();
        apply_query_params(
            &mut url,
            &[("q".to_string(), "rust lang".to_string())],
        );
        assert_eq!(url.query(), Some("q=rust+lang"));
    }

    #[test]
    fn empty_params_leave_url_untouched() {
        let mut url = Url::parse("https://api.example.com/items?keep=1").unwrap();
        apply_query_params(&mut url, &[]);
        assert_eq!(url.query(), Some("keep=1"));
    }
}
