//! Upstream OpenID Connect connector.
//!
//! Sends the user agent to the upstream authorization endpoint, exchanges
//! the returned code at the token endpoint and verifies the upstream ID
//! token against the upstream JWKS. Endpoints come from discovery unless
//! all three are configured explicitly.
//!
//! When the client requested `offline_access`, the upstream refresh token is
//! kept as connector data so later refreshes can be checked upstream.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use super::{CallbackConnector, ConnectorError, ConnectorScopes, RefreshConnector};
use crate::types::Identity;

fn default_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "profile".to_string(),
        "email".to_string(),
    ]
}

fn default_groups_claim() -> String {
    "groups".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_jwks_refresh_interval() -> Duration {
    Duration::from_secs(60)
}

/// Configuration for [`OidcConnector`].
#[derive(Debug, Clone, Deserialize)]
pub struct OidcConfig {
    /// Upstream issuer URL.
    pub issuer: String,

    /// Client ID registered at the upstream.
    pub client_id: String,

    /// Client secret registered at the upstream.
    pub client_secret: String,

    /// Scopes requested upstream.
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Override for the discovered authorization endpoint.
    #[serde(default)]
    pub authorization_endpoint: Option<Url>,

    /// Override for the discovered token endpoint.
    #[serde(default)]
    pub token_endpoint: Option<Url>,

    /// Override for the discovered JWKS URI.
    #[serde(default)]
    pub jwks_uri: Option<Url>,

    /// Claim holding group memberships. Arrays and comma-separated strings
    /// are both accepted.
    #[serde(default = "default_groups_claim")]
    pub groups_claim: String,

    /// Treat every upstream email as verified.
    #[serde(default)]
    pub insecure_skip_email_verified: bool,

    /// Timeout for upstream HTTP calls.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Minimum time between JWKS fetches caused by an unknown key ID.
    #[serde(
        default = "default_jwks_refresh_interval",
        with = "humantime_serde"
    )]
    pub jwks_refresh_interval: Duration,
}

/// Resolved upstream endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub jwks_uri: Url,
}

#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    issuer: String,
    authorization_endpoint: Url,
    token_endpoint: Url,
    jwks_uri: Url,
}

#[derive(Debug, Deserialize)]
struct UpstreamTokenResponse {
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpstreamErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpstreamClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

/// Connector state persisted with the grant.
#[derive(Debug, Default, Serialize, Deserialize)]
struct OidcConnectorData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

fn unknown_key(kid: &str) -> ConnectorError {
    ConnectorError::upstream(format!("no upstream key {kid}"))
}

/// Connector for an upstream OpenID Connect provider.
#[derive(Debug)]
pub struct OidcConnector {
    config: OidcConfig,
    issuer: String,
    endpoints: ProviderEndpoints,
    http: reqwest::Client,
    jwks: RwLock<Option<CachedJwks>>,
}

#[derive(Debug)]
struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

impl OidcConnector {
    /// Creates a connector with known endpoints.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Configuration` if the HTTP client cannot be built.
    pub fn new(config: OidcConfig, endpoints: ProviderEndpoints) -> Result<Self, ConnectorError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConnectorError::Configuration(format!("http client: {e}")))?;

        Ok(Self {
            issuer: config.issuer.trim_end_matches('/').to_string(),
            config,
            endpoints,
            http,
            jwks: RwLock::new(None),
        })
    }

    /// Creates a connector, resolving endpoints through discovery when the
    /// configuration does not name all of them.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails or reports a different issuer.
    pub async fn open(config: OidcConfig) -> Result<Self, ConnectorError> {
        if let (Some(auth), Some(token), Some(jwks)) = (
            config.authorization_endpoint.clone(),
            config.token_endpoint.clone(),
            config.jwks_uri.clone(),
        ) {
            let endpoints = ProviderEndpoints {
                authorization_endpoint: auth,
                token_endpoint: token,
                jwks_uri: jwks,
            };
            return Self::new(config, endpoints);
        }

        let issuer = config.issuer.trim_end_matches('/');
        let discovery_url = format!("{issuer}/.well-known/openid-configuration");
        tracing::debug!(url = %discovery_url, "Fetching upstream discovery document");

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConnectorError::Configuration(format!("http client: {e}")))?;
        let response = http.get(&discovery_url).send().await?;
        if !response.status().is_success() {
            return Err(ConnectorError::upstream(format!(
                "discovery returned HTTP {}",
                response.status()
            )));
        }
        let metadata: ProviderMetadata = response.json().await?;

        if metadata.issuer.trim_end_matches('/') != issuer {
            return Err(ConnectorError::Configuration(format!(
                "discovery issuer {} does not match configured issuer {issuer}",
                metadata.issuer
            )));
        }

        let endpoints = ProviderEndpoints {
            authorization_endpoint: config
                .authorization_endpoint
                .clone()
                .unwrap_or(metadata.authorization_endpoint),
            token_endpoint: config
                .token_endpoint
                .clone()
                .unwrap_or(metadata.token_endpoint),
            jwks_uri: config.jwks_uri.clone().unwrap_or(metadata.jwks_uri),
        };
        Self::new(config, endpoints)
    }

    /// Resolved upstream endpoints.
    #[must_use]
    pub fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
    ) -> Result<UpstreamTokenResponse, ConnectorError> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("client_id", self.config.client_id.as_str()));
        form.push(("client_secret", self.config.client_secret.as_str()));

        let response = self
            .http
            .post(self.endpoints.token_endpoint.clone())
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<UpstreamErrorResponse>(&body) {
                return Err(ConnectorError::access_denied(format!(
                    "{}: {}",
                    err.error,
                    err.error_description.unwrap_or_default()
                )));
            }
            return Err(ConnectorError::upstream(format!(
                "token endpoint returned HTTP {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ConnectorError::upstream(format!("unreadable token response: {e}")))
    }

    async fn fetch_jwks(&self) -> Result<JwkSet, ConnectorError> {
        let response = self
            .http
            .get(self.endpoints.jwks_uri.clone())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ConnectorError::upstream(format!(
                "jwks endpoint returned HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ConnectorError::upstream(format!("unreadable jwks: {e}")))
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, ConnectorError> {
        if let Some(key) = self.cached_key(&*self.jwks.read().await, kid)? {
            return Ok(key);
        }

        // Unknown kid: the upstream may have rotated. The write lock keeps
        // concurrent misses down to one fetch.
        let mut cache = self.jwks.write().await;
        if let Some(key) = self.cached_key(&cache, kid)? {
            return Ok(key);
        }
        let keys = self.fetch_jwks().await?;
        let key = keys.find(kid).map(DecodingKey::from_jwk).transpose()?;
        *cache = Some(CachedJwks {
            keys,
            fetched_at: Instant::now(),
        });
        key.ok_or_else(|| unknown_key(kid))
    }

    /// `Ok(None)` means the cache cannot answer and a fetch is allowed.
    fn cached_key(
        &self,
        cache: &Option<CachedJwks>,
        kid: &str,
    ) -> Result<Option<DecodingKey>, ConnectorError> {
        let Some(cached) = cache else {
            return Ok(None);
        };
        if let Some(jwk) = cached.keys.find(kid) {
            return Ok(Some(DecodingKey::from_jwk(jwk)?));
        }
        if cached.fetched_at.elapsed() < self.config.jwks_refresh_interval {
            tracing::debug!(kid, "Unknown upstream key; JWKS was fetched recently");
            return Err(unknown_key(kid));
        }
        Ok(None)
    }

    async fn verify_id_token(&self, id_token: &str) -> Result<UpstreamClaims, ConnectorError> {
        let header = decode_header(id_token)?;
        if matches!(
            header.alg,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(ConnectorError::upstream("symmetric ID token signature"));
        }
        let kid = header
            .kid
            .ok_or_else(|| ConnectorError::upstream("ID token has no kid"))?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[&self.config.client_id]);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = 60;

        Ok(decode::<UpstreamClaims>(id_token, &key, &validation)?.claims)
    }

    fn groups(&self, claims: &UpstreamClaims) -> Vec<String> {
        match claims.extra.get(&self.config.groups_claim) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str())
                .map(String::from)
                .collect(),
            Some(serde_json::Value::String(s)) => s
                .split(',')
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    fn identity(
        &self,
        scopes: ConnectorScopes,
        claims: UpstreamClaims,
        refresh_token: Option<String>,
    ) -> Result<Identity, ConnectorError> {
        let groups = if scopes.groups {
            self.groups(&claims)
        } else {
            Vec::new()
        };
        let email_verified =
            self.config.insecure_skip_email_verified || claims.email_verified.unwrap_or(false);
        let username = claims
            .name
            .clone()
            .or_else(|| claims.preferred_username.clone())
            .unwrap_or_default();

        let mut identity = Identity::new(claims.sub)
            .with_username(username)
            .with_email(claims.email.unwrap_or_default(), email_verified)
            .with_groups(groups);
        identity.claims.preferred_username = claims.preferred_username;

        if scopes.offline_access {
            let data = OidcConnectorData { refresh_token };
            let bytes = serde_json::to_vec(&data)
                .map_err(|e| ConnectorError::upstream(format!("connector data: {e}")))?;
            identity = identity.with_connector_data(bytes);
        }
        Ok(identity)
    }
}

#[async_trait]
impl CallbackConnector for OidcConnector {
    fn login_url(
        &self,
        scopes: ConnectorScopes,
        callback_url: &str,
        state: &str,
    ) -> Result<Url, ConnectorError> {
        let mut upstream_scopes = self.config.scopes.clone();
        if scopes.offline_access && !upstream_scopes.iter().any(|s| s == "offline_access") {
            upstream_scopes.push("offline_access".to_string());
        }

        let mut url = self.endpoints.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", callback_url)
            .append_pair("response_type", "code")
            .append_pair("scope", &upstream_scopes.join(" "))
            .append_pair("state", state);
        Ok(url)
    }

    async fn handle_callback(
        &self,
        scopes: ConnectorScopes,
        callback_url: &str,
        query: &HashMap<String, String>,
    ) -> Result<Identity, ConnectorError> {
        if let Some(error) = query.get("error") {
            let description = query
                .get("error_description")
                .map(String::as_str)
                .unwrap_or_default();
            return Err(ConnectorError::access_denied(format!(
                "{error}: {description}"
            )));
        }

        let code = query
            .get("code")
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ConnectorError::invalid_request("callback has no code"))?;

        let tokens = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("redirect_uri", callback_url),
            ])
            .await?;
        let id_token = tokens
            .id_token
            .ok_or_else(|| ConnectorError::upstream("token response has no id_token"))?;

        let claims = self.verify_id_token(&id_token).await?;
        tracing::debug!(issuer = %self.issuer, "Verified upstream ID token");

        self.identity(scopes, claims, tokens.refresh_token)
    }
}

#[async_trait]
impl RefreshConnector for OidcConnector {
    async fn refresh(
        &self,
        scopes: ConnectorScopes,
        identity: Identity,
    ) -> Result<Identity, ConnectorError> {
        let data: OidcConnectorData = identity
            .connector_data
            .as_deref()
            .map(serde_json::from_slice)
            .transpose()
            .map_err(|e| ConnectorError::upstream(format!("connector data: {e}")))?
            .unwrap_or_default();
        let refresh_token = data
            .refresh_token
            .ok_or_else(|| ConnectorError::access_denied("no upstream refresh token"))?;

        let tokens = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .await?;
        let next_refresh = tokens.refresh_token.or(Some(refresh_token));

        match tokens.id_token {
            Some(id_token) => {
                let claims = self.verify_id_token(&id_token).await?;
                if claims.sub != identity.claims.user_id {
                    return Err(ConnectorError::access_denied("upstream subject changed"));
                }
                self.identity(scopes, claims, next_refresh)
            }
            None => {
                let bytes = serde_json::to_vec(&OidcConnectorData {
                    refresh_token: next_refresh,
                })
                .map_err(|e| ConnectorError::upstream(format!("connector data: {e}")))?;
                Ok(Identity::from_parts(identity.claims, Some(bytes)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::OffsetDateTime;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::token::jwt::{Jwks, SigningAlgorithm, SigningKeyPair};

    const CALLBACK: &str = "http://127.0.0.1:5556/dex/callback";

    struct Upstream {
        server: MockServer,
        key: SigningKeyPair,
    }

    impl Upstream {
        async fn start() -> Self {
            let server = MockServer::start().await;
            let key = SigningKeyPair::generate(SigningAlgorithm::RS256).unwrap();

            Mock::given(method("GET"))
                .and(path("/.well-known/openid-configuration"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "issuer": server.uri(),
                    "authorization_endpoint": format!("{}/authorize", server.uri()),
                    "token_endpoint": format!("{}/token", server.uri()),
                    "jwks_uri": format!("{}/keys", server.uri()),
                })))
                .mount(&server)
                .await;

            Mock::given(method("GET"))
                .and(path("/keys"))
                .respond_with(ResponseTemplate::new(200).set_body_json(Jwks {
                    keys: vec![key.to_jwk()],
                }))
                .mount(&server)
                .await;

            Self { server, key }
        }

        fn id_token(&self, aud: &str, sub: &str) -> String {
            let now = OffsetDateTime::now_utc().unix_timestamp();
            self.key
                .sign(&json!({
                    "iss": self.server.uri(),
                    "sub": sub,
                    "aud": aud,
                    "exp": now + 300,
                    "iat": now,
                    "email": "jane@example.com",
                    "email_verified": true,
                    "name": "Jane Doe",
                    "groups": ["admins", "dev"],
                }))
                .unwrap()
        }

        fn config(&self) -> OidcConfig {
            OidcConfig {
                issuer: self.server.uri(),
                client_id: "broker".to_string(),
                client_secret: "upstream-secret".to_string(),
                scopes: default_scopes(),
                authorization_endpoint: None,
                token_endpoint: None,
                jwks_uri: None,
                groups_claim: default_groups_claim(),
                insecure_skip_email_verified: false,
                timeout: default_timeout(),
                jwks_refresh_interval: default_jwks_refresh_interval(),
            }
        }
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_discovery_and_login_url() {
        let upstream = Upstream::start().await;
        let connector = OidcConnector::open(upstream.config()).await.unwrap();

        let scopes = ConnectorScopes {
            offline_access: true,
            groups: false,
        };
        let url = connector.login_url(scopes, CALLBACK, "st-1").unwrap();
        assert_eq!(url.path(), "/authorize");

        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "broker");
        assert_eq!(params["redirect_uri"], CALLBACK);
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["state"], "st-1");
        assert!(params["scope"].contains("offline_access"));
    }

    #[tokio::test]
    async fn test_callback_exchanges_code_and_verifies_token() {
        let upstream = Upstream::start().await;
        let id_token = upstream.id_token("broker", "upstream-user-1");

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("code=upstream-code"))
            .and(body_string_contains("client_secret=upstream-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at",
                "token_type": "Bearer",
                "id_token": id_token,
                "refresh_token": "upstream-refresh",
            })))
            .expect(1)
            .mount(&upstream.server)
            .await;

        let connector = OidcConnector::open(upstream.config()).await.unwrap();
        let scopes = ConnectorScopes {
            offline_access: true,
            groups: true,
        };
        let identity = connector
            .handle_callback(scopes, CALLBACK, &query(&[("code", "upstream-code")]))
            .await
            .unwrap();

        assert_eq!(identity.claims.user_id, "upstream-user-1");
        assert_eq!(identity.claims.username, "Jane Doe");
        assert!(identity.claims.email_verified);
        assert_eq!(identity.claims.groups, vec!["admins", "dev"]);

        let data: OidcConnectorData =
            serde_json::from_slice(identity.connector_data.as_deref().unwrap()).unwrap();
        assert_eq!(data.refresh_token.as_deref(), Some("upstream-refresh"));
    }

    #[tokio::test]
    async fn test_upstream_error_is_access_denied() {
        let upstream = Upstream::start().await;
        let connector = OidcConnector::open(upstream.config()).await.unwrap();

        let err = connector
            .handle_callback(
                ConnectorScopes::default(),
                CALLBACK,
                &query(&[("error", "access_denied"), ("state", "x")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::AccessDenied(_)));

        let err = connector
            .handle_callback(ConnectorScopes::default(), CALLBACK, &query(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_token_for_other_audience_rejected() {
        let upstream = Upstream::start().await;
        let id_token = upstream.id_token("someone-else", "upstream-user-1");

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at",
                "id_token": id_token,
            })))
            .mount(&upstream.server)
            .await;

        let connector = OidcConnector::open(upstream.config()).await.unwrap();
        let err = connector
            .handle_callback(
                ConnectorScopes::default(),
                CALLBACK,
                &query(&[("code", "c")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::TokenValidation(_)));
    }

    #[tokio::test]
    async fn test_unknown_kid_refetch_is_throttled() {
        let upstream = Upstream::start().await;
        let connector = OidcConnector::open(upstream.config()).await.unwrap();

        let stranger = SigningKeyPair::generate(SigningAlgorithm::RS256).unwrap();
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let forged = stranger
            .sign(&json!({
                "iss": upstream.server.uri(),
                "sub": "upstream-user-1",
                "aud": "broker",
                "exp": now + 300,
                "iat": now,
            }))
            .unwrap();

        for _ in 0..3 {
            assert!(connector.verify_id_token(&forged).await.is_err());
        }
        fn key_fetches(requests: &[wiremock::Request]) -> usize {
            requests.iter().filter(|r| r.url.path() == "/keys").count()
        }
        let requests = upstream.server.received_requests().await.unwrap();
        assert_eq!(key_fetches(&requests), 1);

        // Known keys are still served from the cache.
        let genuine = upstream.id_token("broker", "upstream-user-1");
        assert!(connector.verify_id_token(&genuine).await.is_ok());
        let requests = upstream.server.received_requests().await.unwrap();
        assert_eq!(key_fetches(&requests), 1);
    }

    #[tokio::test]
    async fn test_refresh_uses_upstream_refresh_token() {
        let upstream = Upstream::start().await;
        let id_token = upstream.id_token("broker", "upstream-user-1");

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=upstream-refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at2",
                "id_token": id_token,
                "refresh_token": "upstream-refresh-2",
            })))
            .mount(&upstream.server)
            .await;

        let connector = OidcConnector::open(upstream.config()).await.unwrap();
        let identity = Identity::new("upstream-user-1").with_connector_data(
            serde_json::to_vec(&OidcConnectorData {
                refresh_token: Some("upstream-refresh".to_string()),
            })
            .unwrap(),
        );
        let scopes = ConnectorScopes {
            offline_access: true,
            groups: false,
        };
        let refreshed = connector.refresh(scopes, identity).await.unwrap();
        let data: OidcConnectorData =
            serde_json::from_slice(refreshed.connector_data.as_deref().unwrap()).unwrap();
        assert_eq!(data.refresh_token.as_deref(), Some("upstream-refresh-2"));

        let err = connector
            .refresh(scopes, Identity::new("upstream-user-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::AccessDenied(_)));
    }
}
