//! Single-use authorization codes.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::oauth::pkce::PkceChallenge;
use crate::secret;
use crate::types::auth_request::AuthRequest;
use crate::types::identity::Claims;

/// Snapshot of an authenticated [`AuthRequest`], redeemable exactly once.
///
/// There is no `used` flag: redemption removes the record atomically, so a
/// code that can still be read has never been redeemed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthCode {
    /// SHA-256 hex of the code value. The value itself is only ever sent
    /// to the client.
    pub code_hash: String,

    /// ID of the request this code was created from.
    pub auth_request_id: String,

    /// Client the code was issued to.
    pub client_id: String,

    /// Redirect URI the code was delivered to; must match at redemption.
    pub redirect_uri: String,

    /// Granted scopes.
    pub scopes: Vec<String>,

    /// Nonce from the original request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Authenticated user.
    pub claims: Claims,

    /// Connector that authenticated the user.
    pub connector_id: String,

    /// Opaque connector state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_data: Option<Vec<u8>>,

    /// PKCE challenge the redeeming client must answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkce: Option<PkceChallenge>,

    /// Absolute expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,

    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl AuthCode {
    /// Snapshots an authenticated request into a code whose value is
    /// `code`.
    ///
    /// Returns `None` if the request has no claims or no connector, which
    /// means it was never authenticated.
    #[must_use]
    pub fn from_request(
        request: &AuthRequest,
        code: &str,
        now: OffsetDateTime,
        expiry: OffsetDateTime,
    ) -> Option<Self> {
        if !request.logged_in {
            return None;
        }
        Some(Self {
            code_hash: secret::sha256_hex(code),
            auth_request_id: request.id.clone(),
            client_id: request.client_id.clone(),
            redirect_uri: request.redirect_uri.clone(),
            scopes: request.scopes.clone(),
            nonce: request.nonce.clone(),
            claims: request.claims.clone()?,
            connector_id: request.connector_id.clone()?,
            connector_data: request.connector_data.clone(),
            pkce: request.pkce.clone(),
            expiry,
            created_at: now,
        })
    }

    /// Returns `true` if the code has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expiry
    }
}
