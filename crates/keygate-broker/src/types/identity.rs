//! Identities reported by connectors.

use serde::{Deserialize, Serialize};

/// Claims about an end user, as normalized from an upstream identity source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Stable upstream user ID. Combined with the connector ID to form `sub`.
    pub user_id: String,

    /// Display name.
    #[serde(default)]
    pub username: String,

    /// Preferred username, if the upstream distinguishes it from the display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    /// Email address.
    #[serde(default)]
    pub email: String,

    /// Whether the upstream verified the email address.
    #[serde(default)]
    pub email_verified: bool,

    /// Group memberships.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

/// The outcome of a successful upstream authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Normalized claims.
    pub claims: Claims,

    /// Opaque connector state, handed back to the connector on refresh.
    pub connector_data: Option<Vec<u8>>,
}

impl Identity {
    /// Creates an identity with only a user ID set.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            claims: Claims {
                user_id: user_id.into(),
                ..Claims::default()
            },
            connector_data: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.claims.username = username.into();
        self
    }

    /// Sets the email address and its verification status.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>, verified: bool) -> Self {
        self.claims.email = email.into();
        self.claims.email_verified = verified;
        self
    }

    /// Sets the group memberships.
    #[must_use]
    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.claims.groups = groups;
        self
    }

    /// Attaches opaque connector state.
    #[must_use]
    pub fn with_connector_data(mut self, data: Vec<u8>) -> Self {
        self.connector_data = Some(data);
        self
    }

    /// Rebuilds an identity from persisted claims and connector state.
    #[must_use]
    pub fn from_parts(claims: Claims, connector_data: Option<Vec<u8>>) -> Self {
        Self {
            claims,
            connector_data,
        }
    }
}
