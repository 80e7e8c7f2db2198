//! Client registration storage trait.

use async_trait::async_trait;

use super::Updater;
use crate::AuthResult;
use crate::types::Client;

/// Storage for relying party registrations.
#[async_trait]
pub trait ClientStorage: Send + Sync {
    /// Stores a new client.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Conflict` if a client with the same ID exists.
    async fn create_client(&self, client: Client) -> AuthResult<()>;

    /// Finds a client by ID.
    ///
    /// # Returns
    ///
    /// `Ok(None)` if no client is registered under `id`.
    async fn get_client(&self, id: &str) -> AuthResult<Option<Client>>;

    /// Applies an administrative update.
    ///
    /// # Returns
    ///
    /// The updated client, or `Ok(None)` if it does not exist.
    async fn update_client(&self, id: &str, updater: Updater<Client>)
    -> AuthResult<Option<Client>>;

    /// Deletes a client. Returns `true` if it existed.
    async fn delete_client(&self, id: &str) -> AuthResult<bool>;

    /// Lists all clients.
    async fn list_clients(&self) -> AuthResult<Vec<Client>>;
}
