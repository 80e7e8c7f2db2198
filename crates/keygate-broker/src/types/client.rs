//! Relying party registrations.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::secret;

/// A registered relying party.
///
/// Confidential clients authenticate at the token endpoint with a secret,
/// stored here only as an Argon2 PHC string. Public clients cannot keep a
/// secret and must bind every code to a PKCE challenge instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Client {
    /// Client identifier (`client_id`).
    pub id: String,

    /// Display name shown on login pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Argon2 hash of the client secret. `None` for public clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_hash: Option<String>,

    /// Redirect URIs registered for this client, compared exactly.
    pub redirect_uris: Vec<String>,

    /// Whether this is a public client.
    #[serde(default)]
    pub public: bool,
}

impl Client {
    /// Creates a confidential client from a plaintext secret.
    ///
    /// # Errors
    ///
    /// Returns `ClientValidationError::SecretHash` if hashing fails.
    pub fn confidential(
        id: impl Into<String>,
        secret: &str,
        redirect_uris: Vec<String>,
    ) -> Result<Self, ClientValidationError> {
        let secret_hash = secret::hash_secret(secret)
            .map_err(|e| ClientValidationError::SecretHash(e.to_string()))?;
        Ok(Self {
            id: id.into(),
            name: None,
            secret_hash: Some(secret_hash),
            redirect_uris,
            public: false,
        })
    }

    /// Creates a public client.
    #[must_use]
    pub fn public(id: impl Into<String>, redirect_uris: Vec<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            secret_hash: None,
            redirect_uris,
            public: true,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Validates the registration.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ClientValidationError> {
        if self.id.is_empty() {
            return Err(ClientValidationError::EmptyClientId);
        }

        if self.redirect_uris.is_empty() {
            return Err(ClientValidationError::NoRedirectUris);
        }

        for uri in &self.redirect_uris {
            Url::parse(uri).map_err(|_| ClientValidationError::InvalidRedirectUri(uri.clone()))?;
        }

        match (self.public, &self.secret_hash) {
            (false, None) => Err(ClientValidationError::MissingSecret),
            (true, Some(_)) => Err(ClientValidationError::PublicClientSecret),
            _ => Ok(()),
        }
    }

    /// Checks if the given redirect URI is registered for this client.
    #[must_use]
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|allowed| allowed == uri)
    }

    /// Checks a presented secret against the stored hash.
    ///
    /// Always `false` for public clients.
    #[must_use]
    pub fn verify_secret(&self, presented: &str) -> bool {
        match &self.secret_hash {
            Some(hash) => secret::verify_secret(presented, hash).unwrap_or(false),
            None => false,
        }
    }

    /// Returns the display name, falling back to the client ID.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Client registration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientValidationError {
    /// Client ID cannot be empty.
    #[error("Client ID cannot be empty")]
    EmptyClientId,

    /// At least one redirect URI is required.
    #[error("At least one redirect URI is required")]
    NoRedirectUris,

    /// A redirect URI is not an absolute URL.
    #[error("Invalid redirect URI: {0}")]
    InvalidRedirectUri(String),

    /// Confidential clients require a client secret.
    #[error("Confidential clients require a client secret")]
    MissingSecret,

    /// Public clients cannot hold a secret.
    #[error("Public clients cannot have a client secret")]
    PublicClientSecret,

    /// The secret could not be hashed.
    #[error("Failed to hash client secret: {0}")]
    SecretHash(String),
}
