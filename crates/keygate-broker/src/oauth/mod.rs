//! OAuth 2.0 / OpenID Connect authorization flow.
//!
//! The authorization code flow is implemented across several submodules:
//!
//! - [`authorize`] - Request/response types for the authorization endpoint
//! - [`service`] - Auth request state machine driven by connectors
//! - [`pkce`] - PKCE challenge/verifier implementation
//! - [`token`] - Token endpoint request and response types
//!
//! # Example
//!
//! ```ignore
//! use keygate_broker::oauth::{AuthorizationService, LoginStep};
//!
//! let service = AuthorizationService::new(storage, connectors, config);
//! let request = service.create_request(&params, now).await?;
//! match service.select_connector(&request.id, "github", now).await? {
//!     LoginStep::Redirect(url) => { /* 302 to url */ }
//!     LoginStep::PasswordPrompt { .. } => { /* render the form */ }
//! }
//! ```

pub mod authorize;
pub mod pkce;
pub mod service;
pub mod token;

// Authorization endpoint types
pub use authorize::{
    AuthorizationRejection, AuthorizationRequest, AuthorizationResponse, error_redirect_url,
};

// PKCE types
pub use pkce::{PkceChallenge, PkceChallengeMethod, PkceError, PkceVerifier};

// Service types
pub use service::{AuthorizationService, LoginStep};

// Token endpoint types
pub use token::{
    ClientCredentials, GrantType, TokenErrorResponse, TokenRequest, TokenResponse,
    parse_basic_auth,
};
