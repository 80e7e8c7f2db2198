//! Authorization code storage trait.
//!
//! # Security Considerations
//!
//! - Never log authorization codes
//! - Codes are keyed by their SHA-256 hash; plaintext values are not stored
//! - `take_auth_code` must be atomic to prevent replay

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::types::AuthCode;

/// Storage for issued authorization codes.
#[async_trait]
pub trait AuthCodeStorage: Send + Sync {
    /// Stores a new code.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Conflict` if the code hash already exists.
    async fn create_auth_code(&self, code: AuthCode) -> AuthResult<()>;

    /// Reads and deletes a code in a single atomic operation.
    ///
    /// This is the redemption primitive. Among concurrent callers for the
    /// same code hash exactly one gets `Some`; every other caller, and every
    /// later caller, gets `None`.
    ///
    /// Expired codes are returned as well; the caller checks the expiry.
    async fn take_auth_code(&self, code_hash: &str) -> AuthResult<Option<AuthCode>>;

    /// Deletes all codes expired at `now`, returning how many were removed.
    async fn delete_expired_auth_codes(&self, now: OffsetDateTime) -> AuthResult<u64>;
}
