//! Riptide: an async HTTP client core.
//!
//! Three pieces:
//! - [`session`]: the request engine. A [`Session`] merges per-call options
//!   over its defaults, applies authentication, and drives the retry loop
//!   (exponential backoff with jitter, per-attempt timeouts).
//! - [`auth`]: pluggable authentication behind the [`AuthHandler`] trait,
//!   from stateless header injectors to a full OAuth2 token lifecycle with
//!   PKCE and single-flight refresh.
//! - [`storage`]: token persistence, in memory or as an encrypted JSON
//!   document on disk.
//!
//! ```no_run
//! use riptide_client::{RequestOptions, RetryPolicy, Session};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), riptide_client::ClientError> {
//! let session = Session::builder()
//!     .base_url("https://api.example.com/v1/")
//!     .retry(RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30))?)
//!     .build()?;
//!
//! let user: serde_json::Value = session
//!     .get("users/me", RequestOptions::new())
//!     .await?
//!     .json()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod auth;
pub mod error;
pub mod session;
pub mod storage;

pub use auth::{
    ApiKeyAuth, AuthHandler, AuthorizationRequest, BasicAuth, BearerAuth, GrantFlow, OAuth2Auth,
    OAuth2Config, TokenRecord,
};
pub use error::{AuthError, ClientError, ClientResult, NetworkCause, StorageError};
pub use session::{
    Body, JitterSource, RequestConfig, RequestOptions, Response, RetryPolicy, Session,
    SessionBuilder, ThreadRngJitter,
};
pub use storage::{FileStorage, MemoryStorage, TokenStorage};
