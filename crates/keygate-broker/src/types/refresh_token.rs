//! Refresh token domain type.
//!
//! The value handed to clients is `<id>.<secret>`. The ID locates the record;
//! the secret is never stored, only its SHA-256 digest. Rotation replaces the
//! digest, so an old value stops matching even though the ID is unchanged.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::secret;
use crate::types::identity::Claims;

/// Refresh token record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshToken {
    /// Record ID, the first half of the client-visible value.
    pub id: String,

    /// SHA-256 hex digest of the current secret.
    pub secret_hash: String,

    /// Client the token is bound to.
    pub client_id: String,

    /// Claims of the user at the last issuance.
    pub claims: Claims,

    /// Scopes originally granted.
    pub scopes: Vec<String>,

    /// Nonce from the original authorization request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Connector that authenticated the user.
    pub connector_id: String,

    /// Opaque connector state passed back on refresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_data: Option<Vec<u8>>,

    /// When this token was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When this token was last redeemed.
    #[serde(with = "time::serde::rfc3339")]
    pub last_used: OffsetDateTime,

    /// Absolute expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
}

impl RefreshToken {
    /// Returns `true` if this token has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expiry
    }

    /// Returns `true` if `secret` is the current secret.
    #[must_use]
    pub fn matches_secret(&self, secret: &str) -> bool {
        secret::constant_time_eq(&self.secret_hash, &secret::sha256_hex(secret))
    }

    /// Returns the client-visible token value for a secret.
    #[must_use]
    pub fn encode_value(id: &str, secret: &str) -> String {
        format!("{id}.{secret}")
    }

    /// Splits a client-visible value into `(id, secret)`.
    ///
    /// Returns `None` if either part is empty.
    #[must_use]
    pub fn decode_value(value: &str) -> Option<(&str, &str)> {
        let (id, secret) = value.split_once('.')?;
        if id.is_empty() || secret.is_empty() {
            return None;
        }
        Some((id, secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn test_decode_value() {
        assert_eq!(
            RefreshToken::decode_value("abc.def"),
            Some(("abc", "def"))
        );
        assert_eq!(RefreshToken::decode_value("abcdef"), None);
        assert_eq!(RefreshToken::decode_value(".def"), None);
        assert_eq!(RefreshToken::decode_value("abc."), None);
    }

    #[test]
    fn test_matches_secret() {
        let now = OffsetDateTime::now_utc();
        let token = RefreshToken {
            id: "id".to_string(),
            secret_hash: secret::sha256_hex("s3cret"),
            client_id: "testclient".to_string(),
            claims: Claims::default(),
            scopes: vec!["openid".to_string(), "offline_access".to_string()],
            nonce: None,
            connector_id: "mock".to_string(),
            connector_data: None,
            created_at: now,
            last_used: now,
            expiry: now + Duration::days(30),
        };

        assert!(token.matches_secret("s3cret"));
        assert!(!token.matches_secret("other"));
        assert!(!token.is_expired(now));
        assert!(token.is_expired(now + Duration::days(31)));
    }
}
