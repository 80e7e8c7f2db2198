//! Storage contract for broker state.
//!
//! The broker owns no durable state itself. Clients, in-flight auth requests,
//! authorization codes and refresh tokens all live behind these traits.
//!
//! # Contract
//!
//! - A missing key is `Ok(None)`, never an error. The core maps it to a
//!   protocol error (`invalid_grant` / `invalid_request`).
//! - Creating an entity whose key already exists fails with
//!   [`AuthError::Conflict`](crate::AuthError::Conflict).
//! - [`AuthCodeStorage::take_auth_code`] reads and deletes in one atomic
//!   step. Of any number of concurrent callers for the same code, exactly
//!   one receives `Some`.
//! - Update methods run the updater under the backend's per-key atomicity
//!   guarantee (row lock, compare-and-swap, ...). An updater error aborts the
//!   update and leaves the stored value untouched.
//!
//! These guarantees must hold across processes sharing one backend; an
//! in-process mutex does not satisfy them.
//!
//! # Implementations
//!
//! - [`memory::MemoryStorage`] - in-process backend on `dashmap`

pub mod auth_code;
pub mod auth_request;
pub mod client;
pub mod memory;
pub mod refresh_token;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;

pub use auth_code::AuthCodeStorage;
pub use auth_request::AuthRequestStorage;
pub use client::ClientStorage;
pub use memory::MemoryStorage;
pub use refresh_token::RefreshTokenStorage;

/// Read-modify-write closure applied atomically by update methods.
pub type Updater<T> = Box<dyn FnOnce(T) -> AuthResult<T> + Send>;

/// Counts of entities removed by a garbage collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcResult {
    /// Expired auth requests removed.
    pub auth_requests: u64,
    /// Expired authorization codes removed.
    pub auth_codes: u64,
    /// Expired refresh tokens removed.
    pub refresh_tokens: u64,
}

impl GcResult {
    /// Returns `true` if nothing was removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.auth_requests == 0 && self.auth_codes == 0 && self.refresh_tokens == 0
    }
}

/// A complete storage backend.
#[async_trait]
pub trait Storage:
    ClientStorage + AuthRequestStorage + AuthCodeStorage + RefreshTokenStorage
{
    /// Checks that the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the backend cannot serve requests.
    async fn ping(&self) -> AuthResult<()> {
        Ok(())
    }

    /// Deletes every auth request, code and refresh token expired at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the underlying deletions fail.
    async fn garbage_collect(&self, now: OffsetDateTime) -> AuthResult<GcResult> {
        Ok(GcResult {
            auth_requests: self.delete_expired_auth_requests(now).await?,
            auth_codes: self.delete_expired_auth_codes(now).await?,
            refresh_tokens: self.delete_expired_refresh_tokens(now).await?,
        })
    }
}
