//! Static password connector.
//!
//! Users are listed in configuration with Argon2 password hashes. The login
//! name is the email address.

use async_trait::async_trait;
use serde::Deserialize;

use super::{ConnectorError, ConnectorScopes, PasswordConnector, RefreshConnector};
use crate::secret;
use crate::types::Identity;

/// A configured static user.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticUser {
    /// Login name and email claim.
    pub email: String,
    /// Argon2 PHC string of the password.
    pub hash: String,
    /// Display name.
    pub username: String,
    /// Stable user ID.
    pub user_id: String,
    /// Group memberships.
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Configuration for [`StaticPasswordConnector`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaticPasswordConfig {
    /// Label shown for the username field.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Users allowed to log in.
    #[serde(default)]
    pub users: Vec<StaticUser>,
}

/// Password connector backed by a static user list.
#[derive(Debug, Clone)]
pub struct StaticPasswordConnector {
    prompt: String,
    users: Vec<StaticUser>,
}

impl StaticPasswordConnector {
    /// Creates the connector.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Configuration` if a hash is not a valid PHC
    /// string or a user ID repeats.
    pub fn new(config: StaticPasswordConfig) -> Result<Self, ConnectorError> {
        let mut seen = std::collections::HashSet::new();
        for user in &config.users {
            if argon2::PasswordHash::new(&user.hash).is_err() {
                return Err(ConnectorError::Configuration(format!(
                    "user {} has an invalid password hash",
                    user.email
                )));
            }
            if !seen.insert(user.user_id.as_str()) {
                return Err(ConnectorError::Configuration(format!(
                    "duplicate user id {}",
                    user.user_id
                )));
            }
        }

        Ok(Self {
            prompt: config.prompt.unwrap_or_else(|| "Email Address".to_string()),
            users: config.users,
        })
    }

    fn identity(user: &StaticUser) -> Identity {
        Identity::new(&user.user_id)
            .with_username(&user.username)
            .with_email(&user.email, true)
            .with_groups(user.groups.clone())
    }

    fn find_by_email(&self, email: &str) -> Option<&StaticUser> {
        self.users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
    }
}

#[async_trait]
impl PasswordConnector for StaticPasswordConnector {
    fn prompt(&self) -> &str {
        &self.prompt
    }

    async fn login(
        &self,
        _scopes: ConnectorScopes,
        username: &str,
        password: &str,
    ) -> Result<Option<Identity>, ConnectorError> {
        let Some(user) = self.find_by_email(username) else {
            return Ok(None);
        };

        match secret::verify_secret(password, &user.hash) {
            Ok(true) => Ok(Some(Self::identity(user))),
            Ok(false) => Ok(None),
            Err(e) => Err(ConnectorError::Configuration(format!(
                "stored hash unusable: {e}"
            ))),
        }
    }
}

#[async_trait]
impl RefreshConnector for StaticPasswordConnector {
    async fn refresh(
        &self,
        _scopes: ConnectorScopes,
        identity: Identity,
    ) -> Result<Identity, ConnectorError> {
        let user = self
            .users
            .iter()
            .find(|u| u.user_id == identity.claims.user_id)
            .ok_or_else(|| ConnectorError::access_denied("user no longer exists"))?;

        let mut refreshed = Self::identity(user);
        refreshed.connector_data = identity.connector_data;
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> StaticPasswordConnector {
        let hash = secret::hash_secret("password").unwrap();
        StaticPasswordConnector::new(StaticPasswordConfig {
            prompt: None,
            users: vec![StaticUser {
                email: "admin@example.com".to_string(),
                hash,
                username: "admin".to_string(),
                user_id: "08a8684b-db88-4b73-90a9-3cd1661f5466".to_string(),
                groups: vec!["admins".to_string()],
            }],
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_login() {
        let c = connector();
        let scopes = ConnectorScopes::default();

        let identity = c
            .login(scopes, "Admin@Example.com", "password")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.claims.email, "admin@example.com");
        assert!(identity.claims.email_verified);
        assert_eq!(identity.claims.groups, vec!["admins"]);

        assert!(c.login(scopes, "admin@example.com", "wrong").await.unwrap().is_none());
        assert!(c.login(scopes, "nobody@example.com", "password").await.unwrap().is_none());
        assert_eq!(c.prompt(), "Email Address");
    }

    #[tokio::test]
    async fn test_refresh_requires_existing_user() {
        let c = connector();
        let scopes = ConnectorScopes::default();

        let identity = Identity::new("08a8684b-db88-4b73-90a9-3cd1661f5466");
        let refreshed = c.refresh(scopes, identity).await.unwrap();
        assert_eq!(refreshed.claims.username, "admin");

        let err = c.refresh(scopes, Identity::new("gone")).await.unwrap_err();
        assert!(matches!(err, ConnectorError::AccessDenied(_)));
    }

    #[test]
    fn test_rejects_invalid_hash() {
        let result = StaticPasswordConnector::new(StaticPasswordConfig {
            prompt: None,
            users: vec![StaticUser {
                email: "a@example.com".to_string(),
                hash: "not-a-phc-string".to_string(),
                username: "a".to_string(),
                user_id: "1".to_string(),
                groups: vec![],
            }],
        });
        assert!(matches!(result, Err(ConnectorError::Configuration(_))));
    }
}
