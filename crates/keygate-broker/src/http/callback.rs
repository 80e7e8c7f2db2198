//! Upstream callback handlers.
//!
//! Redirect connectors come back with a GET; SAML-style connectors POST a
//! form carrying the assertion and relay state. Both end in a 302 to the
//! client with a code, or in an error page.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::response::Response;
use time::OffsetDateTime;

use super::{BrokerState, error_page, found};

/// `GET /callback`
pub async fn callback_handler(
    State(state): State<BrokerState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    match state
        .authorization
        .handle_callback(&query, OffsetDateTime::now_utc())
        .await
    {
        Ok(redirect) => found(redirect.as_str()),
        Err(err) => error_page(&err),
    }
}

/// `POST /callback`
///
/// The body is parsed leniently: a wrong content type just yields no
/// fields, which fails relay-state resolution like any forged post.
pub async fn post_callback_handler(State(state): State<BrokerState>, body: Bytes) -> Response {
    let form: HashMap<String, String> = url::form_urlencoded::parse(&body)
        .into_owned()
        .collect();
    match state
        .authorization
        .handle_post_callback(&form, OffsetDateTime::now_utc())
        .await
    {
        Ok(redirect) => found(redirect.as_str()),
        Err(err) => error_page(&err),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};

    use super::super::test_support::{
        REDIRECT, app, body_string, location, path_and_query, send,
    };

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_callback_without_state() {
        let app = app(false).await;
        let response = send(&app.router, get("/callback")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("invalid_request"));
    }

    #[tokio::test]
    async fn test_callback_with_forged_state() {
        let app = app(false).await;
        let response = send(&app.router, get("/callback?state=forged")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_post_callback_with_json_body() {
        let app = app(false).await;
        let request = Request::builder()
            .method("POST")
            .uri("/callback")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"RelayState":"x"}"#))
            .unwrap();
        let response = send(&app.router, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_callback_completes_login() {
        let app = app(false).await;
        let uri = format!(
            "/auth?response_type=code&client_id=app&scope=openid&state=abc&redirect_uri={}",
            url::form_urlencoded::byte_serialize(REDIRECT.as_bytes()).collect::<String>()
        );
        let response = send(&app.router, get(&uri)).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let callback = path_and_query(&location(&response));

        let response = send(&app.router, get(&callback)).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let client = location(&response);
        let pairs: HashMap<String, String> = client.query_pairs().into_owned().collect();
        assert!(pairs.contains_key("code"));
        assert_eq!(pairs["state"], "abc");

        // The request is gone once the code is issued.
        let response = send(&app.router, get(&callback)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
