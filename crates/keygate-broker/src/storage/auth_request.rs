//! Auth request storage trait.

use async_trait::async_trait;
use time::OffsetDateTime;

use super::Updater;
use crate::AuthResult;
use crate::types::AuthRequest;

/// Storage for in-flight login attempts.
#[async_trait]
pub trait AuthRequestStorage: Send + Sync {
    /// Stores a new auth request.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Conflict` on a duplicate ID.
    async fn create_auth_request(&self, request: AuthRequest) -> AuthResult<()>;

    /// Finds an auth request by ID.
    ///
    /// Expired requests that have not been collected yet are still returned;
    /// callers check the expiry.
    async fn get_auth_request(&self, id: &str) -> AuthResult<Option<AuthRequest>>;

    /// Atomically updates an auth request.
    ///
    /// # Returns
    ///
    /// The stored result of the updater, or `Ok(None)` if the request no
    /// longer exists.
    ///
    /// # Errors
    ///
    /// Propagates the updater's error; nothing is written in that case.
    async fn update_auth_request(
        &self,
        id: &str,
        updater: Updater<AuthRequest>,
    ) -> AuthResult<Option<AuthRequest>>;

    /// Deletes an auth request.
    ///
    /// Returns `true` only for the caller that actually removed it.
    async fn delete_auth_request(&self, id: &str) -> AuthResult<bool>;

    /// Deletes all requests expired at `now`, returning how many were removed.
    async fn delete_expired_auth_requests(&self, now: OffsetDateTime) -> AuthResult<u64>;
}
