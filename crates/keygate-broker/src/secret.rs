//! Random value generation and secret hashing.
//!
//! - Opaque values (auth codes, request IDs, refresh secrets) come from `OsRng`
//!   and are base64url encoded without padding.
//! - Client secrets and connector passwords are hashed with Argon2id and
//!   stored as PHC strings.
//! - Refresh secrets are stored as SHA-256 hex digests and compared in
//!   constant time.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Number of random bytes in an authorization code or refresh secret.
pub const TOKEN_BYTES: usize = 32;

/// Number of random bytes in an auth request or refresh token ID.
pub const ID_BYTES: usize = 16;

/// Generates `len` random bytes encoded as base64url.
#[must_use]
pub fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates a new opaque identifier.
#[must_use]
pub fn new_id() -> String {
    random_urlsafe(ID_BYTES)
}

/// Generates a new high-entropy opaque token value.
#[must_use]
pub fn new_token() -> String {
    random_urlsafe(TOKEN_BYTES)
}

/// SHA-256 of `value` as lowercase hex.
#[must_use]
pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Compares two strings without short-circuiting on the first difference.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Hashes a secret for storage using Argon2id.
///
/// # Errors
///
/// Returns `argon2::password_hash::Error` if hashing fails (rare).
pub fn hash_secret(secret: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(secret.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verifies a secret against a stored Argon2 PHC string.
///
/// Returns `Ok(false)` on mismatch; `Err` only if the stored hash is malformed.
pub fn verify_secret(secret: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed = PasswordHash::new(hash)?;
    Ok(Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_length_and_alphabet() {
        let token = new_token();
        // 32 bytes -> 43 base64url characters
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(token, new_token());
    }

    #[test]
    fn test_id_length() {
        assert_eq!(new_id().len(), 22);
    }

    #[test]
    fn test_sha256_hex() {
        let hash = sha256_hex("refresh-secret");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, sha256_hex("refresh-secret"));
        assert_ne!(hash, sha256_hex("refresh-secret2"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn test_hash_and_verify_secret() {
        let hash = hash_secret("testclientsecret").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_secret("testclientsecret", &hash).unwrap());
        assert!(!verify_secret("wrong", &hash).unwrap());
        assert!(verify_secret("x", "not-a-phc-string").is_err());
    }
}
