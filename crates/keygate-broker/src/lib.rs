//! # keygate-broker
//!
//! Core of the Keygate federated OpenID Connect broker.
//!
//! Keygate sits between OAuth clients and upstream identity sources. A client
//! starts an authorization code flow against Keygate, the user logs in
//! through one of the configured connectors, and Keygate issues its own
//! signed ID tokens, access tokens and refresh tokens.
//!
//! ## Modules
//!
//! - [`config`] - Issuer, lifetimes, scopes and signing settings
//! - [`connector`] - Upstream identity connectors and their registry
//! - [`oauth`] - Authorization request state machine and endpoint types
//! - [`token`] - Key rotation, JWT signing and the token endpoint logic
//! - [`storage`] - Storage traits and the in-memory backend
//! - [`health`] - Background health checks
//! - [`http`] - Axum handlers and router
//! - [`types`] - Persisted entities

pub mod config;
pub mod connector;
pub mod error;
pub mod health;
pub mod http;
pub mod oauth;
pub mod secret;
pub mod storage;
pub mod token;
pub mod types;

pub use config::{BrokerConfig, ConfigError, ExpiryConfig, SigningConfig};
pub use connector::{Connector, ConnectorError, ConnectorKind, ConnectorRegistry};
pub use error::{AuthError, ErrorCategory};
pub use health::{HealthCheck, HealthChecker, HealthStatus, StorageHealthCheck};
pub use http::{BrokerState, router};
pub use oauth::{AuthorizationService, LoginStep};
pub use storage::{GcResult, MemoryStorage, Storage};
pub use token::{KeyStore, SigningAlgorithm, SigningKeyPair, TokenService};
pub use types::{AuthCode, AuthRequest, Claims, Client, Identity, RefreshToken};

/// Type alias for broker results.
pub type AuthResult<T> = Result<T, AuthError>;
