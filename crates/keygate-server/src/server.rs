use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    BoxError, Router,
    error_handling::HandleErrorLayer,
    http::{HeaderValue, Method, StatusCode, header},
    middleware,
};
use keygate_broker::connector::mock::{MockCallbackConnector, MockPostConnector};
use keygate_broker::connector::oidc::{OidcConfig, OidcConnector};
use keygate_broker::connector::password::{StaticPasswordConfig, StaticPasswordConnector};
use keygate_broker::connector::{Connector, ConnectorError, ConnectorKind, ConnectorRegistry};
use keygate_broker::health::{HealthChecker, StorageHealthCheck};
use keygate_broker::storage::{ClientStorage, MemoryStorage, Storage};
use keygate_broker::token::{JwtError, KeyStore};
use keygate_broker::{AuthError, BrokerState};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use url::Url;

use crate::config::{AppConfig, ConnectorSettings, ConnectorType};
use crate::middleware as app_middleware;

/// How often the storage health check runs.
const STORAGE_CHECK_PERIOD: Duration = Duration::from_secs(15);

/// Errors raised while assembling the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("connector {id}: {source}")]
    Connector {
        id: String,
        #[source]
        source: ConnectorError,
    },

    #[error("signing keys: {0}")]
    Keys(#[from] JwtError),

    #[error("storage: {0}")]
    Storage(#[from] AuthError),
}

/// Opens every configured connector. Connectors that talk to an upstream
/// fetch its discovery document here, so a bad upstream fails startup.
pub async fn build_connectors(
    settings: &[ConnectorSettings],
) -> Result<ConnectorRegistry, ServerError> {
    let registry = ConnectorRegistry::new();
    for s in settings {
        let connector = open_connector(s)
            .await
            .map_err(|source| ServerError::Connector {
                id: s.id.clone(),
                source,
            })?;
        let connector = match s.rotate_refresh_tokens {
            Some(rotate) => connector.with_rotation(rotate),
            None => connector,
        };
        tracing::info!(connector_id = %s.id, kind = connector.kind.as_str(), "Connector opened");
        registry.register(connector);
    }
    Ok(registry)
}

#[derive(Debug, Default, Deserialize)]
struct MockPostSettings {
    #[serde(default)]
    sso_url: Option<Url>,
}

async fn open_connector(s: &ConnectorSettings) -> Result<Connector, ConnectorError> {
    let connector = match s.kind {
        ConnectorType::Password => {
            let password = Arc::new(StaticPasswordConnector::new(
                decode::<StaticPasswordConfig>(s)?,
            )?);
            Connector::new(&s.id, &s.name, ConnectorKind::Password(password.clone()))
                .with_refresh(password)
        }
        ConnectorType::Oidc => {
            let oidc = Arc::new(OidcConnector::open(decode::<OidcConfig>(s)?).await?);
            Connector::new(&s.id, &s.name, ConnectorKind::RedirectCallback(oidc.clone()))
                .with_refresh(oidc)
        }
        ConnectorType::Mock => {
            let mock = Arc::new(MockCallbackConnector::default());
            Connector::new(&s.id, &s.name, ConnectorKind::RedirectCallback(mock.clone()))
                .with_refresh(mock)
        }
        ConnectorType::MockPost => {
            let settings = decode::<MockPostSettings>(s)?;
            Connector::new(
                &s.id,
                &s.name,
                ConnectorKind::PostCallback(Arc::new(MockPostConnector::new(settings.sso_url))),
            )
        }
    };
    Ok(connector)
}

fn decode<T: DeserializeOwned>(s: &ConnectorSettings) -> Result<T, ConnectorError> {
    toml::Value::Table(s.config.clone())
        .try_into()
        .map_err(|e| ConnectorError::Configuration(format!("invalid config: {e}")))
}

/// Storage, connectors, keys and health, wired from configuration.
pub async fn build_state(
    cfg: &AppConfig,
) -> Result<(BrokerState, Arc<dyn Storage>), ServerError> {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    for static_client in &cfg.static_clients {
        let client = static_client.to_client().map_err(ServerError::Config)?;
        storage.create_client(client).await?;
    }

    let connectors = Arc::new(build_connectors(&cfg.connectors).await?);
    if connectors.is_empty() {
        tracing::warn!("No connectors configured; logins will fail");
    }

    let broker = &cfg.broker.core;
    let algorithm = broker
        .signing_algorithm()
        .map_err(|e| ServerError::Config(e.to_string()))?;
    let keys = Arc::new(KeyStore::generate(
        algorithm,
        broker.issuer.clone(),
        broker.signing.keys_to_keep,
    )?);
    tracing::info!(kid = %keys.active_kid(), alg = %algorithm, "Signing key generated");

    let health = Arc::new(HealthChecker::new());
    health.register(
        Arc::new(StorageHealthCheck::new(storage.clone())),
        true,
        STORAGE_CHECK_PERIOD,
    );

    let state = BrokerState::new(
        storage.clone(),
        connectors,
        keys,
        health,
        Arc::new(broker.clone()),
    );
    Ok((state, storage))
}

pub fn build_app(cfg: &AppConfig, state: BrokerState) -> Router {
    let issuer_path = cfg.broker.core.issuer_path();
    let broker = keygate_broker::router(state);
    // Routes live under the issuer path, e.g. /dex/auth
    let router = if issuer_path.is_empty() {
        broker
    } else {
        Router::new().nest(&issuer_path, broker)
    };

    let router = match cors_layer(&cfg.server.allowed_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    // Layer order, outermost first: request id -> trace -> timeout -> body limit
    router
        .layer(axum::extract::DefaultBodyLimit::max(cfg.server.body_limit_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .timeout(cfg.server.request_timeout),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok())
                .collect::<Vec<_>>(),
        )
    };
    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
    )
}

async fn handle_middleware_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out".to_string())
    } else {
        tracing::error!(error = %err, "Unhandled middleware error");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    }
}

/// Sweeps expired auth requests, codes and refresh tokens every `period`.
pub fn spawn_garbage_collector(storage: Arc<dyn Storage>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately; nothing has expired yet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match storage.garbage_collect(OffsetDateTime::now_utc()).await {
                Ok(result) if !result.is_empty() => tracing::info!(
                    auth_requests = result.auth_requests,
                    auth_codes = result.auth_codes,
                    refresh_tokens = result.refresh_tokens,
                    "Garbage collection removed expired objects"
                ),
                Ok(_) => tracing::debug!("Garbage collection found nothing to remove"),
                Err(e) => tracing::error!(error = %e, "Garbage collection failed"),
            }
        }
    })
}

pub struct KeygateServer {
    addr: SocketAddr,
    app: Router,
    state: BrokerState,
    gc: JoinHandle<()>,
}

pub struct ServerBuilder {
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Must be called from within a tokio runtime.
    pub async fn build(self) -> Result<KeygateServer, ServerError> {
        let (state, storage) = build_state(&self.config).await?;
        let app = build_app(&self.config, state.clone());
        let gc = spawn_garbage_collector(storage, self.config.broker.gc_interval);
        Ok(KeygateServer {
            addr: self.config.addr(),
            app,
            state,
            gc,
        })
    }
}

impl KeygateServer {
    /// The assembled router.
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    /// Shared broker state.
    pub fn state(&self) -> &BrokerState {
        &self.state
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener until a shutdown signal arrives.
    pub async fn serve(self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        tracing::info!(
            addr = %listener.local_addr()?,
            issuer = %self.state.config.issuer,
            "listening"
        );
        let result = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        self.gc.abort();
        result?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;

    fn mock_config(issuer: &str) -> AppConfig {
        let raw = format!(
            r#"
            [broker]
            issuer = "{issuer}"

            [[static_clients]]
            id = "app"
            secret = "app-secret"
            redirect_uris = ["https://app.example/callback"]

            [[connectors]]
            type = "mock"
            id = "mock"
            name = "Example"
            "#
        );
        toml::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_routes_nested_under_issuer_path() {
        let cfg = mock_config("http://127.0.0.1:5556/dex");
        let (state, _storage) = build_state(&cfg).await.unwrap();
        let app = build_app(&cfg, state);

        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/dex/.well-known/openid-configuration")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key("x-request-id"));

        let res = app
            .oneshot(
                Request::builder()
                    .uri("/.well-known/openid-configuration")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_static_clients_registered() {
        let cfg = mock_config("http://127.0.0.1:5556");
        let (_state, storage) = build_state(&cfg).await.unwrap();
        let client = storage.get_client("app").await.unwrap().unwrap();
        assert!(client.verify_secret("app-secret"));
    }

    #[tokio::test]
    async fn test_bad_connector_config_fails() {
        let raw = r#"
            [[connectors]]
            type = "password"
            id = "local"
            name = "Email"

            [[connectors.config.users]]
            email = "a@example.com"
            hash = "not-a-hash"
            username = "a"
            user_id = "1"
        "#;
        let cfg: AppConfig = toml::from_str(raw).unwrap();
        let err = build_state(&cfg).await.err().unwrap();
        assert!(matches!(err, ServerError::Connector { ref id, .. } if id == "local"));
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let mut cfg = mock_config("http://127.0.0.1:5556");
        cfg.server.allowed_origins = vec!["https://app.example".to_string()];
        let (state, _storage) = build_state(&cfg).await.unwrap();
        let app = build_app(&cfg, state);

        let res = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/token")
                    .header(header::ORIGIN, "https://app.example")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example"
        );
    }
}
