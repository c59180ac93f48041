//! Buffered response type.
//!
//! Bodies are read fully before the response is handed back, so a `Response`
//! can be cloned into terminal errors and inspected repeatedly without
//! consuming anything.

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{ClientError, NetworkCause};

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    body: Vec<u8>,
}

impl Response {
    /// Buffer a transport response. Body read failures count as transport
    /// failures for retry classification.
    pub(crate) async fn from_reqwest(resp: reqwest::Response) -> Result<Self, NetworkCause> {
        let status = resp.status();
        let headers = resp.headers().clone();
        let url = resp.url().clone();
        let body = resp
            .bytes()
            .await
            .map_err(NetworkCause::Transport)?
            .to_vec();
        Ok(Self { status, headers, url, body })
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The final URL the response was served from.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The raw body bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// The body decoded as UTF-8, lossily.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    ///
    /// # Errors
    /// Returns [`ClientError::Decode`] when the body is not valid JSON for
    /// `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_slice(&self.body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn fake(status: StatusCode, body: &[u8]) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            url: Url::parse("https://test.invalid/").expect("static url"),
            body: body.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_decodes_body() {
        #[derive(serde::Deserialize)]
        struct Item {
            id: u32,
        }
        let resp = Response::fake(StatusCode::OK, br#"{"id": 7}"#);
        let item: Item = resp.json().unwrap();
        assert_eq!(item.id, 7);
    }

    #[test]
    fn json_decode_failure_is_decode_error() {
        let resp = Response::fake(StatusCode::OK, b"not json");
        let err = resp.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[test]
    fn text_is_lossy() {
        let resp = Response::fake(StatusCode::OK, &[0x68, 0x69, 0xFF]);
        assert!(resp.text().starts_with("hi"));
    }
}
