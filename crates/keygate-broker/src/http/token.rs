//! Token endpoint handler.
//!
//! Accepts `application/x-www-form-urlencoded` bodies. Client credentials
//! come from the Basic header or the body, never both. All responses carry
//! `Cache-Control: no-store` and `Pragma: no-cache`.

use axum::Form;
use axum::extract::State;
use axum::extract::rejection::FormRejection;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use time::OffsetDateTime;

use super::BrokerState;
use crate::error::AuthError;
use crate::oauth::{
    ClientCredentials, TokenErrorResponse, TokenRequest, TokenResponse, parse_basic_auth,
};

/// `POST /token`
pub async fn token_handler(
    State(state): State<BrokerState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let Form(request) = match form {
        Ok(form) => form,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Unreadable token request");
            return token_error_response(&AuthError::invalid_request(
                "Token request body must be a form",
            ));
        }
    };

    let basic = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic_auth);

    let credentials = match ClientCredentials::resolve(basic, &request) {
        Ok(credentials) => credentials,
        Err(err) => return token_error_response(&err),
    };

    match state
        .tokens
        .handle(&request, &credentials, OffsetDateTime::now_utc())
        .await
    {
        Ok(response) => token_success_response(response),
        Err(err) => {
            tracing::debug!(
                client_id = %credentials.client_id,
                grant_type = %request.grant_type,
                error = %err,
                "Token request rejected"
            );
            token_error_response(&err)
        }
    }
}

fn token_success_response(response: TokenResponse) -> Response {
    (
        StatusCode::OK,
        [
            ("Content-Type", "application/json"),
            ("Cache-Control", "no-store"),
            ("Pragma", "no-cache"),
        ],
        Json(response),
    )
        .into_response()
}

fn token_error_response(err: &AuthError) -> Response {
    if err.is_server_error() {
        tracing::error!(error = %err, category = ?err.category(), "Token endpoint failure");
    }
    (
        err.http_status(),
        [
            ("Content-Type", "application/json"),
            ("Cache-Control", "no-store"),
            ("Pragma", "no-cache"),
        ],
        Json(TokenErrorResponse::from(err)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::Body;
    use axum::http::Request;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    use super::super::test_support::{
        REDIRECT, app, body_string, location, path_and_query, send,
    };
    use super::*;
    use crate::token::IdTokenClaims;

    fn form_post(body: String, basic: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(credentials) = basic {
            builder = builder.header(
                header::AUTHORIZATION,
                format!("Basic {}", STANDARD.encode(credentials)),
            );
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn encode(value: &str) -> String {
        url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
    }

    async fn obtain_code(router: &axum::Router, scope: &str) -> String {
        let uri = format!(
            "/auth?response_type=code&client_id=app&scope={}&state=st&nonce=n-0S6&redirect_uri={}",
            encode(scope),
            encode(REDIRECT)
        );
        let get = |uri: String| Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = send(router, get(uri)).await;
        let response = send(router, get(path_and_query(&location(&response)))).await;
        let pairs: HashMap<String, String> =
            location(&response).query_pairs().into_owned().collect();
        pairs["code"].clone()
    }

    #[tokio::test]
    async fn test_code_exchange_and_refresh() {
        let app = app(false).await;
        let code = obtain_code(&app.router, "openid email offline_access").await;

        let body = format!(
            "grant_type=authorization_code&code={code}&redirect_uri={}",
            encode(REDIRECT)
        );
        let response = send(&app.router, form_post(body, Some("app:app-secret"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["cache-control"], "no-store");
        assert_eq!(response.headers()["pragma"], "no-cache");

        let tokens: TokenResponse = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(tokens.token_type, "bearer");
        let claims = app
            .state
            .tokens
            .keys()
            .verify::<IdTokenClaims>(&tokens.id_token)
            .unwrap()
            .claims;
        assert_eq!(claims.aud, "app");
        assert_eq!(claims.nonce.as_deref(), Some("n-0S6"));
        assert_eq!(claims.email.as_deref(), Some("kilgore@kilgore.trout"));

        let refresh = tokens.refresh_token.unwrap();
        let body = format!(
            "grant_type=refresh_token&refresh_token={}&client_id=app&client_secret=app-secret",
            encode(&refresh)
        );
        let response = send(&app.router, form_post(body.clone(), None)).await;
        assert_eq!(response.status(), StatusCode::OK);

        // Rotated: the old value is dead.
        let response = send(&app.router, form_post(body, None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let err: TokenErrorResponse = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(err.error, "invalid_grant");
    }

    #[tokio::test]
    async fn test_wrong_secret_is_unauthorized() {
        let app = app(false).await;
        let code = obtain_code(&app.router, "openid").await;
        let body = format!(
            "grant_type=authorization_code&code={code}&redirect_uri={}",
            encode(REDIRECT)
        );
        let response = send(&app.router, form_post(body, Some("app:wrong"))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["cache-control"], "no-store");
        let err: TokenErrorResponse = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(err.error, "invalid_client");
    }

    #[tokio::test]
    async fn test_credentials_in_header_and_body() {
        let app = app(false).await;
        let body = "grant_type=authorization_code&code=x&client_secret=app-secret".to_string();
        let response = send(&app.router, form_post(body, Some("app:app-secret"))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let err: TokenErrorResponse = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(err.error, "invalid_request");
    }

    #[tokio::test]
    async fn test_unsupported_grant_type() {
        let app = app(false).await;
        let body = "grant_type=password&username=a&password=b".to_string();
        let response = send(&app.router, form_post(body, Some("app:app-secret"))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let err: TokenErrorResponse = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(err.error, "unsupported_grant_type");
    }

    #[tokio::test]
    async fn test_non_form_body() {
        let app = app(false).await;
        let request = Request::builder()
            .method("POST")
            .uri("/token")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = send(&app.router, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let err: TokenErrorResponse = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(err.error, "invalid_request");
    }
}
