//! Upstream identity connectors.
//!
//! A connector adapts one upstream identity source to the broker. Each
//! configured instance has exactly one capability shape, recorded in
//! [`ConnectorKind`]:
//!
//! - [`PasswordConnector`] - synchronous username/password check, no redirect
//! - [`CallbackConnector`] - redirect to an upstream login URL, come back with a GET
//! - [`PostConnector`] - redirect to an upstream login URL, come back with a
//!   POSTed assertion and relay state (SAML style)
//!
//! The broker dispatches on the tag; it never inspects concrete types.
//! Connectors may additionally implement [`RefreshConnector`] to re-validate
//! a user when a refresh token is redeemed.
//!
//! # Implementations
//!
//! - [`password::StaticPasswordConnector`] - static user list with Argon2 hashes
//! - [`oidc::OidcConnector`] - upstream OpenID Connect provider
//! - [`mock::MockCallbackConnector`] / [`mock::MockPostConnector`] - fixed
//!   identities for development and tests

pub mod mock;
pub mod oidc;
pub mod password;
pub mod registry;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::AuthError;
use crate::types::Identity;

pub use registry::ConnectorRegistry;

// ============================================================================
// Errors
// ============================================================================

/// Errors reported by connectors.
///
/// Details stay in the broker log. Conversion into [`AuthError`] keeps only
/// the protocol-level class so upstream messages never reach a client.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// The upstream refused the user.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The callback was malformed (missing code, bad relay state, ...).
    #[error("Invalid callback: {0}")]
    InvalidRequest(String),

    /// The upstream answered with something the connector could not use.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The connector is misconfigured.
    #[error("Connector misconfigured: {0}")]
    Configuration(String),

    /// Network failure talking to the upstream.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The upstream ID token could not be verified.
    #[error("Token validation failed: {0}")]
    TokenValidation(#[from] jsonwebtoken::errors::Error),
}

impl ConnectorError {
    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied(message.into())
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Creates a new `Upstream` error.
    #[must_use]
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }
}

impl From<ConnectorError> for AuthError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::InvalidRequest(_) => {
                AuthError::invalid_request("malformed connector callback")
            }
            ConnectorError::Configuration(_) => AuthError::configuration("connector misconfigured"),
            _ => AuthError::access_denied("upstream authentication failed"),
        }
    }
}

// ============================================================================
// Capability traits
// ============================================================================

/// Scopes of the client request that affect what a connector fetches upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectorScopes {
    /// The client asked for a refresh token; the connector should obtain
    /// whatever it needs to re-validate the user later.
    pub offline_access: bool,
    /// The client asked for group memberships.
    pub groups: bool,
}

impl ConnectorScopes {
    /// Derives connector scopes from requested OAuth scopes.
    #[must_use]
    pub fn from_scopes(scopes: &[String]) -> Self {
        Self {
            offline_access: scopes.iter().any(|s| s == "offline_access"),
            groups: scopes.iter().any(|s| s == "groups"),
        }
    }
}

/// A connector that checks a username and password inline.
#[async_trait]
pub trait PasswordConnector: Send + Sync {
    /// Label for the username field on the login form.
    fn prompt(&self) -> &str {
        "Username"
    }

    /// Checks credentials.
    ///
    /// # Returns
    ///
    /// `Ok(Some(identity))` on success, `Ok(None)` for wrong credentials.
    ///
    /// # Errors
    ///
    /// Returns an error only when the check itself could not be performed.
    async fn login(
        &self,
        scopes: ConnectorScopes,
        username: &str,
        password: &str,
    ) -> Result<Option<Identity>, ConnectorError>;
}

/// A connector that authenticates through an upstream redirect and a GET callback.
#[async_trait]
pub trait CallbackConnector: Send + Sync {
    /// Builds the upstream URL to send the user agent to.
    ///
    /// `state` must come back unchanged as the `state` query parameter of
    /// the callback.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be built.
    fn login_url(
        &self,
        scopes: ConnectorScopes,
        callback_url: &str,
        state: &str,
    ) -> Result<Url, ConnectorError>;

    /// Turns the callback's query parameters into an identity.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` when the upstream refused the user and
    /// `InvalidRequest` for malformed callbacks.
    async fn handle_callback(
        &self,
        scopes: ConnectorScopes,
        callback_url: &str,
        query: &HashMap<String, String>,
    ) -> Result<Identity, ConnectorError>;
}

/// A connector that authenticates through an upstream redirect and a POSTed
/// assertion.
#[async_trait]
pub trait PostConnector: Send + Sync {
    /// Builds the upstream URL to send the user agent to, carrying `relay_state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be built.
    fn login_url(
        &self,
        scopes: ConnectorScopes,
        callback_url: &str,
        relay_state: &str,
    ) -> Result<Url, ConnectorError>;

    /// Validates the posted assertion.
    ///
    /// Called only after the broker has matched the relay state against a
    /// live auth request bound to this connector. `relay_state` is that
    /// verified value; connectors that sign it into the assertion compare it
    /// here.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` for rejected assertions and `InvalidRequest`
    /// for malformed bodies.
    async fn handle_post(
        &self,
        scopes: ConnectorScopes,
        form: &HashMap<String, String>,
        relay_state: &str,
    ) -> Result<Identity, ConnectorError>;
}

/// Optional capability: re-validate a user when a refresh token is redeemed.
#[async_trait]
pub trait RefreshConnector: Send + Sync {
    /// Returns the current identity for a previously authenticated user.
    ///
    /// # Errors
    ///
    /// Any error means the upstream identity is no longer valid.
    async fn refresh(
        &self,
        scopes: ConnectorScopes,
        identity: Identity,
    ) -> Result<Identity, ConnectorError>;
}

// ============================================================================
// Connector instances
// ============================================================================

/// Capability tag of a configured connector.
#[derive(Clone)]
pub enum ConnectorKind {
    /// Username/password check.
    Password(Arc<dyn PasswordConnector>),
    /// Redirect with GET callback.
    RedirectCallback(Arc<dyn CallbackConnector>),
    /// Redirect with POST callback.
    PostCallback(Arc<dyn PostConnector>),
}

impl ConnectorKind {
    /// Returns the tag name, for logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password(_) => "password",
            Self::RedirectCallback(_) => "redirect-callback",
            Self::PostCallback(_) => "post-callback",
        }
    }
}

impl fmt::Debug for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured connector instance.
#[derive(Clone)]
pub struct Connector {
    /// Unique ID, used in URLs and persisted on requests and tokens.
    pub id: String,
    /// Display name for the selection page.
    pub name: String,
    /// Capability shape.
    pub kind: ConnectorKind,
    /// Refresh capability, if the connector supports re-validation.
    pub refresh: Option<Arc<dyn RefreshConnector>>,
    /// Whether refresh tokens issued through this connector rotate on use.
    pub rotate_refresh_tokens: bool,
}

impl Connector {
    /// Creates a connector without refresh support. Rotation defaults to on.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ConnectorKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            refresh: None,
            rotate_refresh_tokens: true,
        }
    }

    /// Attaches a refresh capability.
    #[must_use]
    pub fn with_refresh(mut self, refresh: Arc<dyn RefreshConnector>) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// Sets whether refresh tokens rotate.
    #[must_use]
    pub fn with_rotation(mut self, rotate: bool) -> Self {
        self.rotate_refresh_tokens = rotate;
        self
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("refresh", &self.refresh.is_some())
            .field("rotate_refresh_tokens", &self.rotate_refresh_tokens)
            .finish()
    }
}
