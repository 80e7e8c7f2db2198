use std::net::SocketAddr;
use std::time::Duration;

use keygate_broker::config::BrokerConfig;
use keygate_broker::types::Client;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Issuer, lifetimes, scopes, signing and GC cadence
    #[serde(default)]
    pub broker: BrokerSettings,
    /// Clients registered at startup
    #[serde(default)]
    pub static_clients: Vec<StaticClient>,
    /// Upstream identity connectors
    #[serde(default)]
    pub connectors: Vec<ConnectorSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub body_limit_bytes: usize,
    /// Upper bound on handling one request, upstream calls included.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Origins allowed to call the token and discovery endpoints from a
    /// browser. `*` allows any origin; empty disables CORS.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5556,
            body_limit_bytes: 1024 * 1024,
            request_timeout: Duration::from_secs(30),
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_gc_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

/// Broker settings plus the server-side sweep interval.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSettings {
    #[serde(flatten)]
    pub core: BrokerConfig,

    /// How often expired requests, codes and tokens are swept.
    #[serde(default = "default_gc_interval", with = "humantime_serde")]
    pub gc_interval: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            core: BrokerConfig::default(),
            gc_interval: default_gc_interval(),
        }
    }
}

/// A client registered from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticClient {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Plaintext secret; hashed before it reaches storage.
    #[serde(default)]
    pub secret: Option<String>,
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub public: bool,
}

impl StaticClient {
    /// Builds the stored registration, hashing the secret.
    pub fn to_client(&self) -> Result<Client, String> {
        let client = if self.public {
            Client::public(&self.id, self.redirect_uris.clone())
        } else {
            let secret = self
                .secret
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| format!("static client {} requires a secret", self.id))?;
            Client::confidential(&self.id, secret, self.redirect_uris.clone())
                .map_err(|e| format!("static client {}: {e}", self.id))?
        };
        let client = match &self.name {
            Some(name) => client.with_name(name),
            None => client,
        };
        client
            .validate()
            .map_err(|e| format!("static client {}: {e}", self.id))?;
        Ok(client)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectorType {
    Password,
    Oidc,
    Mock,
    MockPost,
}

/// One configured connector. `config` is decoded according to `type`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorSettings {
    #[serde(rename = "type")]
    pub kind: ConnectorType,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub config: toml::Table,
    /// Defaults to rotating refresh tokens on every use.
    #[serde(default)]
    pub rotate_refresh_tokens: Option<bool>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        if self.server.request_timeout.is_zero() {
            return Err("server.request_timeout must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        self.broker
            .core
            .validate()
            .map_err(|e| format!("broker config error: {e}"))?;
        if self.broker.gc_interval.is_zero() {
            return Err("broker.gc_interval must be > 0".into());
        }

        let mut client_ids = std::collections::HashSet::new();
        for client in &self.static_clients {
            if !client_ids.insert(client.id.as_str()) {
                return Err(format!("duplicate static client id {}", client.id));
            }
        }
        let mut connector_ids = std::collections::HashSet::new();
        for connector in &self.connectors {
            if connector.id.is_empty() {
                return Err("connector id must not be empty".into());
            }
            if !connector_ids.insert(connector.id.as_str()) {
                return Err(format!("duplicate connector id {}", connector.id));
            }
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        SocketAddr::from((host, self.server.port))
    }
}

pub mod loader {
    use std::path::PathBuf;

    use config::{Config, Environment, File};

    use super::AppConfig;

    /// Default file looked up when no path is given.
    pub const DEFAULT_CONFIG_FILE: &str = "keygate.toml";

    /// Loads the file (if it exists), applies `KEYGATE__*` overrides and
    /// validates the result.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            return Err(format!("config file {} not found", pathbuf.display()));
        }
        // Environment variable overrides, e.g., KEYGATE__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("KEYGATE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
