//! HTTP surface of the broker.
//!
//! [`router`] builds the routes relative to the issuer path; the server
//! nests the returned router under it.
//!
//! | Route | Handler |
//! |-------|---------|
//! | `GET /auth` | [`authorize::authorize_handler`] |
//! | `GET /auth/{connector}` | [`authorize::connector_login_handler`] |
//! | `POST /auth/{connector}/login` | [`authorize::password_login_handler`] |
//! | `GET /callback` | [`callback::callback_handler`] |
//! | `POST /callback` | [`callback::post_callback_handler`] |
//! | `POST /token` | [`token::token_handler`] |
//! | `GET /keys` | [`discovery::jwks_handler`] |
//! | `GET /.well-known/openid-configuration` | [`discovery::openid_configuration_handler`] |
//! | `GET /healthz` | [`health::healthz_handler`] |

pub mod authorize;
pub mod callback;
pub mod discovery;
pub mod health;
pub mod templates;
pub mod token;

use std::sync::Arc;

use axum::Router;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};

use crate::config::BrokerConfig;
use crate::connector::ConnectorRegistry;
use crate::error::AuthError;
use crate::health::HealthChecker;
use crate::oauth::AuthorizationService;
use crate::storage::Storage;
use crate::token::{KeyStore, TokenService};

/// State shared by every broker handler.
#[derive(Clone)]
pub struct BrokerState {
    /// Login flow.
    pub authorization: AuthorizationService,
    /// Token endpoint.
    pub tokens: TokenService,
    /// Health aggregation.
    pub health: Arc<HealthChecker>,
    /// Broker settings.
    pub config: Arc<BrokerConfig>,
}

impl BrokerState {
    /// Wires both services over the same storage and connectors.
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        connectors: Arc<ConnectorRegistry>,
        keys: Arc<KeyStore>,
        health: Arc<HealthChecker>,
        config: Arc<BrokerConfig>,
    ) -> Self {
        Self {
            authorization: AuthorizationService::new(
                storage.clone(),
                connectors.clone(),
                config.clone(),
            ),
            tokens: TokenService::new(storage, connectors, keys, config.clone()),
            health,
            config,
        }
    }
}

/// Builds the broker routes.
pub fn router(state: BrokerState) -> Router {
    Router::new()
        .route("/auth", get(authorize::authorize_handler))
        .route("/auth/{connector}", get(authorize::connector_login_handler))
        .route(
            "/auth/{connector}/login",
            post(authorize::password_login_handler),
        )
        .route(
            "/callback",
            get(callback::callback_handler).post(callback::post_callback_handler),
        )
        .route("/token", post(token::token_handler))
        .route("/keys", get(discovery::jwks_handler))
        .route(
            "/.well-known/openid-configuration",
            get(discovery::openid_configuration_handler),
        )
        .route("/healthz", get(health::healthz_handler))
        .with_state(state)
}

/// 302 Found to `location`.
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Renders an error as an HTML page.
///
/// Browser-facing pages use 400 for every client error; only server faults
/// get a 5xx.
pub(crate) fn error_page(err: &AuthError) -> Response {
    let status = if err.is_server_error() {
        tracing::error!(error = %err, category = ?err.category(), "Login flow failed");
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        tracing::debug!(error = %err, "Login flow rejected");
        StatusCode::BAD_REQUEST
    };
    (
        status,
        Html(templates::render_error_page(
            err.oauth_error_code(),
            &err.public_description(),
        )),
    )
        .into_response()
}
