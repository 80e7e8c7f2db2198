//! In-flight login attempts.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::oauth::pkce::PkceChallenge;
use crate::types::identity::Claims;

/// Lifecycle state of an [`AuthRequest`].
///
/// `Exchanged` is not represented: a request is deleted when it is turned
/// into a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequestStatus {
    /// Waiting for the user to authenticate with a connector.
    Created,
    /// A connector reported an identity; ready to become a code.
    Authenticated,
    /// The TTL elapsed before the request was exchanged.
    Expired,
}

/// One login attempt, correlating a client's authorization request with the
/// identity a connector eventually reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthRequest {
    /// Opaque ID, also used as the upstream `state` / relay state.
    pub id: String,

    /// Requesting client.
    pub client_id: String,

    /// Verified redirect URI.
    pub redirect_uri: String,

    /// Requested scopes.
    pub scopes: Vec<String>,

    /// Client `state`, echoed back on the final redirect.
    pub state: String,

    /// Client `nonce`, copied into the ID token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// PKCE challenge the code will be bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkce: Option<PkceChallenge>,

    /// Connector the user chose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<String>,

    /// Set once by the connector after successful upstream authentication.
    pub logged_in: bool,

    /// Claims reported by the connector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<Claims>,

    /// Opaque connector state reported alongside the claims.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_data: Option<Vec<u8>>,

    /// Absolute expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,

    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl AuthRequest {
    /// Returns `true` if the request has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expiry
    }

    /// Returns the lifecycle state at `now`.
    #[must_use]
    pub fn status(&self, now: OffsetDateTime) -> AuthRequestStatus {
        if self.is_expired(now) {
            AuthRequestStatus::Expired
        } else if self.logged_in {
            AuthRequestStatus::Authenticated
        } else {
            AuthRequestStatus::Created
        }
    }

    /// Returns `true` if the given scope was requested.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}
