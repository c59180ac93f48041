//! Pluggable authentication.
//!
//! Every scheme implements [`AuthHandler`], a single `apply` capability that
//! rewrites the prepared request. Stateless header injectors live in
//! [`handlers`]; the stateful OAuth2 token lifecycle lives in [`oauth2`].

mod handlers;
pub mod oauth2;
pub(crate) mod pkce;
mod types;

use async_trait::async_trait;

use crate::error::AuthError;
use crate::session::RequestConfig;

pub use handlers::{ApiKeyAuth, BasicAuth, BearerAuth};
pub use oauth2::OAuth2Auth;
pub use types::{AuthorizationRequest, GrantFlow, OAuth2Config, TokenRecord};

/// Capability to authenticate an outgoing request.
///
/// Handlers receive the fully merged [`RequestConfig`] and return it with
/// credentials attached. Implementations must be shareable across concurrent
/// requests; any internal state needs its own synchronization.
#[async_trait]
pub trait AuthHandler: Send + Sync {
    /// Attach credentials to the prepared request.
    async fn apply(&self, config: RequestConfig) -> Result<RequestConfig, AuthError>;
}
