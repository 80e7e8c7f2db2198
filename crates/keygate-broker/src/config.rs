//! Broker configuration.
//!
//! All sections deserialize with defaults so a configuration file only needs
//! to name what it changes. Durations use humantime notation (`"5m"`, `"24h"`).
//!
//! ```toml
//! [broker]
//! issuer = "https://id.example.com/dex"
//!
//! [broker.expiry]
//! auth_request = "24h"
//! auth_code = "5m"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::token::jwt::SigningAlgorithm;

/// Scopes the broker understands.
pub const DEFAULT_SCOPES: &[&str] = &[
    "openid",
    "email",
    "profile",
    "groups",
    "offline_access",
    "federated:id",
];

/// Top-level broker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Issuer URL. Routes are served under its path component.
    pub issuer: String,

    /// Lifetimes of requests, codes and tokens.
    pub expiry: ExpiryConfig,

    /// Scopes clients may request.
    pub supported_scopes: Vec<String>,

    /// Token signing settings.
    pub signing: SigningConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            issuer: "http://127.0.0.1:5556".to_string(),
            expiry: ExpiryConfig::default(),
            supported_scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            signing: SigningConfig::default(),
        }
    }
}

/// Lifetimes of broker entities.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExpiryConfig {
    /// How long a login attempt may stay in flight.
    #[serde(with = "humantime_serde")]
    pub auth_request: Duration,

    /// How long an issued authorization code remains redeemable.
    #[serde(with = "humantime_serde")]
    pub auth_code: Duration,

    /// Lifetime of ID and access tokens.
    #[serde(with = "humantime_serde")]
    pub id_token: Duration,

    /// Absolute lifetime of a refresh token.
    #[serde(with = "humantime_serde")]
    pub refresh_token: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            auth_request: Duration::from_secs(24 * 60 * 60),
            auth_code: Duration::from_secs(5 * 60),
            id_token: Duration::from_secs(24 * 60 * 60),
            refresh_token: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// JWT signing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Signing algorithm.
    /// Supported: "RS256", "RS384", "ES384"
    pub algorithm: String,

    /// Number of retired keys kept in the JWKS for verification.
    pub keys_to_keep: usize,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: "RS256".to_string(),
            keys_to_keep: 2,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl BrokerConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the issuer is not an absolute URL, the signing
    /// algorithm is unknown, `openid` is not a supported scope or any
    /// lifetime is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::Missing("broker.issuer".to_string()));
        }
        self.issuer_url()?;

        self.signing_algorithm()?;

        if !self.supported_scopes.iter().any(|s| s == "openid") {
            return Err(ConfigError::InvalidValue(
                "supported_scopes must include openid".to_string(),
            ));
        }

        let lifetimes = [
            ("auth_request", self.expiry.auth_request),
            ("auth_code", self.expiry.auth_code),
            ("id_token", self.expiry.id_token),
            ("refresh_token", self.expiry.refresh_token),
        ];
        for (name, value) in lifetimes {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue(format!(
                    "expiry.{name} must be > 0"
                )));
            }
        }

        Ok(())
    }

    /// Parses the issuer as a URL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the issuer is not an absolute URL.
    pub fn issuer_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.issuer)
            .map_err(|e| ConfigError::InvalidValue(format!("issuer '{}': {e}", self.issuer)))
    }

    /// Returns the issuer without a trailing slash.
    #[must_use]
    pub fn issuer_base(&self) -> &str {
        self.issuer.trim_end_matches('/')
    }

    /// Path prefix under which broker routes are mounted, empty for the root.
    #[must_use]
    pub fn issuer_path(&self) -> String {
        self.issuer_url()
            .map(|url| url.path().trim_end_matches('/').to_string())
            .unwrap_or_default()
    }

    /// Absolute URL of the upstream callback endpoint.
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!("{}/callback", self.issuer_base())
    }

    /// Returns the configured signing algorithm.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for anything other than RS256,
    /// RS384 or ES384.
    pub fn signing_algorithm(&self) -> Result<SigningAlgorithm, ConfigError> {
        self.signing.algorithm.parse().map_err(|_| {
            ConfigError::InvalidValue(format!(
                "Invalid signing algorithm: '{}'. Must be RS256, RS384, or ES384",
                self.signing.algorithm
            ))
        })
    }

    /// Returns `true` if the scope is one clients may request.
    #[must_use]
    pub fn is_supported_scope(&self, scope: &str) -> bool {
        self.supported_scopes.iter().any(|s| s == scope)
    }
}
