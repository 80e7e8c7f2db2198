//! End-to-end login flows against a server bound to an ephemeral port.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use keygate_broker::connector::mock::MockPostConnector;
use keygate_broker::types::Claims;
use keygate_server::config::AppConfig;
use keygate_server::{build_app, build_state};
use reqwest::{StatusCode, redirect::Policy};
use serde_json::Value;
use tokio::task::JoinHandle;

const REDIRECT: &str = "https://app.example/callback";

struct TestServer {
    base: String,
    issuer: String,
    client: reqwest::Client,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Resolves a Location header against the test server.
    fn follow(&self, response: &reqwest::Response) -> reqwest::Url {
        let location = response.headers()["location"].to_str().unwrap();
        reqwest::Url::parse(&self.base).unwrap().join(location).unwrap()
    }

    fn auth_url(&self, client_id: &str, scope: &str, extra: &[(&str, &str)]) -> reqwest::Url {
        let mut url = reqwest::Url::parse(&format!("{}/auth", self.issuer)).unwrap();
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("response_type", "code")
                .append_pair("client_id", client_id)
                .append_pair("redirect_uri", REDIRECT)
                .append_pair("scope", scope)
                .append_pair("state", "client-state")
                .append_pair("nonce", "n-0S6_WzA2Mj");
            for (k, v) in extra {
                q.append_pair(k, v);
            }
        }
        url
    }
}

async fn start_server() -> TestServer {
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{addr}");
    let issuer = format!("{base}/dex");

    let raw = format!(
        r#"
        [broker]
        issuer = "{issuer}"

        [[static_clients]]
        id = "app"
        secret = "app-secret"
        redirect_uris = ["{REDIRECT}"]

        [[static_clients]]
        id = "spa"
        public = true
        redirect_uris = ["{REDIRECT}"]

        [[connectors]]
        type = "mock"
        id = "mock"
        name = "Example"

        [[connectors]]
        type = "mock-post"
        id = "saml"
        name = "SAML"
        "#
    );
    let cfg: AppConfig = toml::from_str(&raw).expect("config");
    cfg.validate().expect("valid config");

    let (state, _storage) = build_state(&cfg).await.expect("state");
    let app = build_app(&cfg, state);

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    let client = reqwest::Client::builder()
        .redirect(Policy::none())
        .build()
        .unwrap();

    TestServer {
        base,
        issuer,
        client,
        shutdown: Some(tx),
        handle: Some(handle),
    }
}

fn jwt_payload(token: &str) -> Value {
    let payload = token.split('.').nth(1).expect("jwt payload");
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap()
}

fn query_map(url: &reqwest::Url) -> HashMap<String, String> {
    url.query_pairs().into_owned().collect()
}

/// Runs /auth through the mock connector and returns the client redirect.
async fn login_with_mock(
    server: &TestServer,
    client_id: &str,
    scope: &str,
    extra: &[(&str, &str)],
) -> reqwest::Url {
    let mut all = vec![("connector_id", "mock")];
    all.extend_from_slice(extra);
    let res = server
        .client
        .get(server.auth_url(client_id, scope, &all))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    let callback = server.follow(&res);
    assert_eq!(callback.path(), "/dex/callback");

    let res = server.client.get(callback).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    server.follow(&res)
}

#[tokio::test]
async fn authorization_code_and_refresh_flow() {
    let server = start_server().await;

    let scope = "openid email groups offline_access";
    let redirect = login_with_mock(&server, "app", scope, &[]).await;
    assert!(redirect.as_str().starts_with(REDIRECT));
    let params = query_map(&redirect);
    assert_eq!(params["state"], "client-state");
    let code = params["code"].clone();

    let res = server
        .client
        .post(format!("{}/token", server.issuer))
        .basic_auth("app", Some("app-secret"))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["cache-control"], "no-store");
    let tokens: Value = res.json().await.unwrap();

    let id_token = jwt_payload(tokens["id_token"].as_str().unwrap());
    assert_eq!(id_token["iss"], server.issuer);
    assert_eq!(id_token["aud"], "app");
    assert_eq!(id_token["nonce"], "n-0S6_WzA2Mj");
    assert_eq!(id_token["email"], "kilgore@kilgore.trout");
    assert_eq!(id_token["groups"], serde_json::json!(["authors"]));
    assert!(id_token["at_hash"].is_string());

    // The code is single-use.
    let res = server
        .client
        .post(format!("{}/token", server.issuer))
        .basic_auth("app", Some("app-secret"))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["error"], "invalid_grant");

    // Refresh with client_secret_post.
    let refresh = tokens["refresh_token"].as_str().unwrap().to_string();
    let res = server
        .client
        .post(format!("{}/token", server.issuer))
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh.as_str()),
            ("client_id", "app"),
            ("client_secret", "app-secret"),
            ("scope", "openid email"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let refreshed: Value = res.json().await.unwrap();
    assert_ne!(refreshed["refresh_token"].as_str(), Some(refresh.as_str()));
    let id_token = jwt_payload(refreshed["id_token"].as_str().unwrap());
    assert!(id_token.get("groups").is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn public_client_requires_pkce() {
    let server = start_server().await;

    // Without a challenge the request is bounced back to the client.
    let res = server
        .client
        .get(server.auth_url("spa", "openid", &[("connector_id", "mock")]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    let params = query_map(&server.follow(&res));
    assert_eq!(params["error"], "invalid_request");

    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
    let redirect = login_with_mock(
        &server,
        "spa",
        "openid",
        &[("code_challenge", challenge), ("code_challenge_method", "S256")],
    )
    .await;
    let code = query_map(&redirect)["code"].clone();

    let res = server
        .client
        .post(format!("{}/token", server.issuer))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT),
            ("client_id", "spa"),
            ("code_verifier", verifier),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    server.shutdown().await;
}

#[tokio::test]
async fn post_callback_flow() {
    let server = start_server().await;

    let res = server
        .client
        .get(server.auth_url("app", "openid email", &[("connector_id", "saml")]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    let sso = server.follow(&res);
    let relay_state = query_map(&sso)["RelayState"].clone();

    let claims = Claims {
        user_id: "saml-user".to_string(),
        username: "Saml User".to_string(),
        email: "saml@example.com".to_string(),
        email_verified: true,
        ..Default::default()
    };
    let assertion = MockPostConnector::encode_assertion(&claims, Some(&relay_state));

    // A forged relay state is refused before the assertion is looked at.
    let res = server
        .client
        .post(format!("{}/callback", server.issuer))
        .form(&[("SAMLResponse", assertion.as_str()), ("RelayState", "forged")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = server
        .client
        .post(format!("{}/callback", server.issuer))
        .form(&[
            ("SAMLResponse", assertion.as_str()),
            ("RelayState", relay_state.as_str()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    let redirect = server.follow(&res);
    assert!(query_map(&redirect).contains_key("code"));

    server.shutdown().await;
}

#[tokio::test]
async fn selection_page_discovery_and_health() {
    let server = start_server().await;

    let res = server
        .client
        .get(server.auth_url("app", "openid", &[]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.text().await.unwrap();
    assert!(body.contains("/dex/auth/mock?req="));
    assert!(body.contains("/dex/auth/saml?req="));

    let res = server
        .client
        .get(format!("{}/.well-known/openid-configuration", server.issuer))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let doc: Value = res.json().await.unwrap();
    assert_eq!(doc["issuer"], server.issuer);
    assert_eq!(doc["jwks_uri"], format!("{}/keys", server.issuer));

    let res = server
        .client
        .get(format!("{}/keys", server.issuer))
        .send()
        .await
        .unwrap();
    let jwks: Value = res.json().await.unwrap();
    assert_eq!(jwks["keys"].as_array().map(Vec::len), Some(1));

    let res = server
        .client
        .get(format!("{}/healthz", server.issuer))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));

    // Unknown client: error page, no redirect.
    let res = server
        .client
        .get(server.auth_url("nobody", "openid", &[]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(res.headers().get("location").is_none());

    // An assertion without relay state is refused.
    let res = server
        .client
        .post(format!("{}/callback", server.issuer))
        .form(&[("SAMLResponse", STANDARD.encode("{}"))])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    server.shutdown().await;
}
