//! In-memory storage backend.
//!
//! Each entity family is a [`DashMap`]. Per-key atomicity comes from the
//! shard lock: `remove` is the atomic take, and updaters run while holding
//! the entry's write guard. State is lost on restart, and the guarantees
//! only hold within a single process.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;

use super::{
    AuthCodeStorage, AuthRequestStorage, ClientStorage, RefreshTokenStorage, Storage, Updater,
};
use crate::types::{AuthCode, AuthRequest, Client, RefreshToken};
use crate::{AuthError, AuthResult};

/// Process-local storage backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    clients: DashMap<String, Client>,
    auth_requests: DashMap<String, AuthRequest>,
    auth_codes: DashMap<String, AuthCode>,
    refresh_tokens: DashMap<String, RefreshToken>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn insert_new<T>(map: &DashMap<String, T>, key: String, value: T, kind: &str) -> AuthResult<()> {
    match map.entry(key) {
        Entry::Occupied(_) => Err(AuthError::conflict(format!("{kind} already exists"))),
        Entry::Vacant(slot) => {
            slot.insert(value);
            Ok(())
        }
    }
}

fn update_entry<T: Clone>(
    map: &DashMap<String, T>,
    id: &str,
    updater: Updater<T>,
) -> AuthResult<Option<T>> {
    let Some(mut entry) = map.get_mut(id) else {
        return Ok(None);
    };
    let updated = updater(entry.value().clone())?;
    *entry.value_mut() = updated.clone();
    Ok(Some(updated))
}

fn remove_where<T>(map: &DashMap<String, T>, expired: impl Fn(&T) -> bool) -> u64 {
    let mut removed = 0u64;
    map.retain(|_, value| {
        if expired(value) {
            removed += 1;
            false
        } else {
            true
        }
    });
    removed
}

#[async_trait]
impl ClientStorage for MemoryStorage {
    async fn create_client(&self, client: Client) -> AuthResult<()> {
        insert_new(&self.clients, client.id.clone(), client, "client")
    }

    async fn get_client(&self, id: &str) -> AuthResult<Option<Client>> {
        Ok(self.clients.get(id).map(|c| c.value().clone()))
    }

    async fn update_client(
        &self,
        id: &str,
        updater: Updater<Client>,
    ) -> AuthResult<Option<Client>> {
        update_entry(&self.clients, id, updater)
    }

    async fn delete_client(&self, id: &str) -> AuthResult<bool> {
        Ok(self.clients.remove(id).is_some())
    }

    async fn list_clients(&self) -> AuthResult<Vec<Client>> {
        let mut clients: Vec<Client> = self.clients.iter().map(|c| c.value().clone()).collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(clients)
    }
}

#[async_trait]
impl AuthRequestStorage for MemoryStorage {
    async fn create_auth_request(&self, request: AuthRequest) -> AuthResult<()> {
        insert_new(
            &self.auth_requests,
            request.id.clone(),
            request,
            "auth request",
        )
    }

    async fn get_auth_request(&self, id: &str) -> AuthResult<Option<AuthRequest>> {
        Ok(self.auth_requests.get(id).map(|r| r.value().clone()))
    }

    async fn update_auth_request(
        &self,
        id: &str,
        updater: Updater<AuthRequest>,
    ) -> AuthResult<Option<AuthRequest>> {
        update_entry(&self.auth_requests, id, updater)
    }

    async fn delete_auth_request(&self, id: &str) -> AuthResult<bool> {
        Ok(self.auth_requests.remove(id).is_some())
    }

    async fn delete_expired_auth_requests(&self, now: OffsetDateTime) -> AuthResult<u64> {
        Ok(remove_where(&self.auth_requests, |r| r.is_expired(now)))
    }
}

#[async_trait]
impl AuthCodeStorage for MemoryStorage {
    async fn create_auth_code(&self, code: AuthCode) -> AuthResult<()> {
        insert_new(&self.auth_codes, code.code_hash.clone(), code, "auth code")
    }

    async fn take_auth_code(&self, code_hash: &str) -> AuthResult<Option<AuthCode>> {
        Ok(self.auth_codes.remove(code_hash).map(|(_, c)| c))
    }

    async fn delete_expired_auth_codes(&self, now: OffsetDateTime) -> AuthResult<u64> {
        Ok(remove_where(&self.auth_codes, |c| c.is_expired(now)))
    }
}

#[async_trait]
impl RefreshTokenStorage for MemoryStorage {
    async fn create_refresh_token(&self, token: RefreshToken) -> AuthResult<()> {
        insert_new(
            &self.refresh_tokens,
            token.id.clone(),
            token,
            "refresh token",
        )
    }

    async fn get_refresh_token(&self, id: &str) -> AuthResult<Option<RefreshToken>> {
        Ok(self.refresh_tokens.get(id).map(|t| t.value().clone()))
    }

    async fn update_refresh_token(
        &self,
        id: &str,
        updater: Updater<RefreshToken>,
    ) -> AuthResult<Option<RefreshToken>> {
        update_entry(&self.refresh_tokens, id, updater)
    }

    async fn delete_refresh_token(&self, id: &str) -> AuthResult<bool> {
        Ok(self.refresh_tokens.remove(id).is_some())
    }

    async fn delete_expired_refresh_tokens(&self, now: OffsetDateTime) -> AuthResult<u64> {
        Ok(remove_where(&self.refresh_tokens, |t| t.is_expired(now)))
    }
}

impl Storage for MemoryStorage {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::Duration;

    use super::*;
    use crate::types::Claims;

    fn make_request(id: &str, expiry: OffsetDateTime) -> AuthRequest {
        AuthRequest {
            id: id.to_string(),
            client_id: "testclient".to_string(),
            redirect_uri: "https://app.example/cb".to_string(),
            scopes: vec!["openid".to_string()],
            state: "state".to_string(),
            nonce: None,
            pkce: None,
            connector_id: None,
            logged_in: false,
            claims: None,
            connector_data: None,
            expiry,
            created_at: expiry - Duration::hours(1),
        }
    }

    fn make_code(code_hash: &str, expiry: OffsetDateTime) -> AuthCode {
        AuthCode {
            code_hash: code_hash.to_string(),
            auth_request_id: "req".to_string(),
            client_id: "testclient".to_string(),
            redirect_uri: "https://app.example/cb".to_string(),
            scopes: vec!["openid".to_string()],
            nonce: None,
            claims: Claims::default(),
            connector_id: "mock".to_string(),
            connector_data: None,
            pkce: None,
            expiry,
            created_at: expiry - Duration::minutes(5),
        }
    }

    #[tokio::test]
    async fn test_create_duplicate_conflicts() {
        let storage = MemoryStorage::new();
        let now = OffsetDateTime::now_utc();
        storage
            .create_auth_request(make_request("a", now + Duration::hours(1)))
            .await
            .unwrap();
        let err = storage
            .create_auth_request(make_request("a", now + Duration::hours(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_missing_keys_are_none() {
        let storage = MemoryStorage::new();
        assert!(storage.get_auth_request("nope").await.unwrap().is_none());
        assert!(storage.take_auth_code("nope").await.unwrap().is_none());
        assert!(storage.get_client("nope").await.unwrap().is_none());
        assert!(storage.get_refresh_token("nope").await.unwrap().is_none());
        let updated = storage
            .update_auth_request("nope", Box::new(|r| Ok(r)))
            .await
            .unwrap();
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn test_take_auth_code_is_single_use() {
        let storage = MemoryStorage::new();
        let expiry = OffsetDateTime::now_utc() + Duration::minutes(5);
        storage.create_auth_code(make_code("c1", expiry)).await.unwrap();

        assert!(storage.take_auth_code("c1").await.unwrap().is_some());
        assert!(storage.take_auth_code("c1").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_take_has_one_winner() {
        let storage = Arc::new(MemoryStorage::new());
        let expiry = OffsetDateTime::now_utc() + Duration::minutes(5);
        storage.create_auth_code(make_code("race", expiry)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                storage.take_auth_code("race").await.unwrap().is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_updater_error_leaves_value_untouched() {
        let storage = MemoryStorage::new();
        let expiry = OffsetDateTime::now_utc() + Duration::hours(1);
        storage
            .create_auth_request(make_request("r", expiry))
            .await
            .unwrap();

        let result = storage
            .update_auth_request(
                "r",
                Box::new(|mut r| {
                    r.logged_in = true;
                    Err(AuthError::invalid_state("refused"))
                }),
            )
            .await;
        assert!(result.is_err());
        assert!(!storage.get_auth_request("r").await.unwrap().unwrap().logged_in);

        let updated = storage
            .update_auth_request(
                "r",
                Box::new(|mut r| {
                    r.logged_in = true;
                    Ok(r)
                }),
            )
            .await
            .unwrap()
            .unwrap();
        assert!(updated.logged_in);
        assert!(storage.get_auth_request("r").await.unwrap().unwrap().logged_in);
    }

    #[tokio::test]
    async fn test_garbage_collect_removes_only_expired() {
        let storage = MemoryStorage::new();
        let now = OffsetDateTime::now_utc();

        storage
            .create_auth_request(make_request("old", now - Duration::minutes(1)))
            .await
            .unwrap();
        storage
            .create_auth_request(make_request("live", now + Duration::hours(1)))
            .await
            .unwrap();
        storage
            .create_auth_code(make_code("old", now - Duration::seconds(1)))
            .await
            .unwrap();
        storage
            .create_auth_code(make_code("live", now + Duration::minutes(5)))
            .await
            .unwrap();

        let result = storage.garbage_collect(now).await.unwrap();
        assert_eq!(result.auth_requests, 1);
        assert_eq!(result.auth_codes, 1);
        assert_eq!(result.refresh_tokens, 0);

        assert!(storage.get_auth_request("old").await.unwrap().is_none());
        assert!(storage.get_auth_request("live").await.unwrap().is_some());
        assert!(storage.take_auth_code("live").await.unwrap().is_some());

        assert!(storage.garbage_collect(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_clients_sorted() {
        let storage = MemoryStorage::new();
        for id in ["b", "a", "c"] {
            storage
                .create_client(Client::public(id, vec!["https://x.example/cb".to_string()]))
                .await
                .unwrap();
        }
        let ids: Vec<String> = storage
            .list_clients()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(storage.delete_client("b").await.unwrap());
        assert!(!storage.delete_client("b").await.unwrap());
    }
}
