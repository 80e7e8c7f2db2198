//! Discovery document and JWKS endpoints.

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use serde::Serialize;

use super::BrokerState;

/// Claims the broker may put in ID tokens.
const CLAIMS_SUPPORTED: &[&str] = &[
    "iss",
    "sub",
    "aud",
    "iat",
    "exp",
    "email",
    "email_verified",
    "groups",
    "name",
    "preferred_username",
    "at_hash",
    "nonce",
];

/// OpenID Provider metadata.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<&'static str>,
    pub subject_types_supported: Vec<&'static str>,
    pub grant_types_supported: Vec<&'static str>,
    pub id_token_signing_alg_values_supported: Vec<&'static str>,
    pub code_challenge_methods_supported: Vec<&'static str>,
    pub scopes_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<&'static str>,
    pub claims_supported: Vec<&'static str>,
}

impl DiscoveryDocument {
    /// Builds the document for the running broker.
    #[must_use]
    pub fn for_state(state: &BrokerState) -> Self {
        let base = state.config.issuer_base();
        Self {
            issuer: state.config.issuer.clone(),
            authorization_endpoint: format!("{base}/auth"),
            token_endpoint: format!("{base}/token"),
            jwks_uri: format!("{base}/keys"),
            response_types_supported: vec!["code"],
            subject_types_supported: vec!["public"],
            grant_types_supported: vec!["authorization_code", "refresh_token"],
            id_token_signing_alg_values_supported: vec![
                state.tokens.keys().active_algorithm().as_str(),
            ],
            code_challenge_methods_supported: vec!["S256", "plain"],
            scopes_supported: state.config.supported_scopes.clone(),
            token_endpoint_auth_methods_supported: vec![
                "client_secret_basic",
                "client_secret_post",
                "none",
            ],
            claims_supported: CLAIMS_SUPPORTED.to_vec(),
        }
    }
}

/// `GET /.well-known/openid-configuration`
pub async fn openid_configuration_handler(
    State(state): State<BrokerState>,
) -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(DiscoveryDocument::for_state(&state)),
    )
}

/// `GET /keys`
///
/// Publishes the active key and every retained previous key.
pub async fn jwks_handler(State(state): State<BrokerState>) -> impl IntoResponse {
    let jwks = state.tokens.keys().jwks();
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        Json(jwks),
    )
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    use super::super::test_support::{app, body_string, send};
    use crate::token::Jwks;

    #[tokio::test]
    async fn test_discovery_document() {
        let app = app(false).await;
        let request = Request::builder()
            .uri("/.well-known/openid-configuration")
            .body(Body::empty())
            .unwrap();
        let response = send(&app.router, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let doc: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(doc["issuer"], "http://127.0.0.1:5556");
        assert_eq!(doc["token_endpoint"], "http://127.0.0.1:5556/token");
        assert_eq!(doc["response_types_supported"], serde_json::json!(["code"]));
        assert_eq!(
            doc["code_challenge_methods_supported"],
            serde_json::json!(["S256", "plain"])
        );
        assert_eq!(
            doc["id_token_signing_alg_values_supported"],
            serde_json::json!(["RS256"])
        );
    }

    #[tokio::test]
    async fn test_jwks_lists_active_key() {
        let app = app(false).await;
        let request = Request::builder().uri("/keys").body(Body::empty()).unwrap();
        let response = send(&app.router, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["cache-control"], "public, max-age=3600");

        let jwks: Jwks = serde_json::from_str(&body_string(response).await).unwrap();
        let kid = app.state.tokens.keys().active_kid();
        assert!(jwks.keys.iter().any(|k| k.kid == kid));
    }
}
