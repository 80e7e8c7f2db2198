//! Refresh token storage trait.

use async_trait::async_trait;
use time::OffsetDateTime;

use super::Updater;
use crate::AuthResult;
use crate::types::RefreshToken;

/// Storage for refresh tokens.
#[async_trait]
pub trait RefreshTokenStorage: Send + Sync {
    /// Stores a new refresh token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Conflict` on a duplicate ID.
    async fn create_refresh_token(&self, token: RefreshToken) -> AuthResult<()>;

    /// Finds a refresh token by ID.
    async fn get_refresh_token(&self, id: &str) -> AuthResult<Option<RefreshToken>>;

    /// Atomically updates a refresh token.
    ///
    /// Rotation relies on this: the updater checks the presented secret
    /// against the stored digest and installs the new digest in the same
    /// step, so two concurrent rotations of one value cannot both succeed.
    ///
    /// # Returns
    ///
    /// The stored result of the updater, or `Ok(None)` if the token no
    /// longer exists.
    ///
    /// # Errors
    ///
    /// Propagates the updater's error; nothing is written in that case.
    async fn update_refresh_token(
        &self,
        id: &str,
        updater: Updater<RefreshToken>,
    ) -> AuthResult<Option<RefreshToken>>;

    /// Deletes a refresh token. Returns `true` if it existed.
    async fn delete_refresh_token(&self, id: &str) -> AuthResult<bool>;

    /// Deletes all tokens expired at `now`, returning how many were removed.
    async fn delete_expired_refresh_tokens(&self, now: OffsetDateTime) -> AuthResult<u64>;
}
