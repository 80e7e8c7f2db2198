//! Token service: redeems codes and refresh tokens for signed tokens.
//!
//! - Authorization code exchange
//! - Refresh token exchange with optional rotation
//! - Access and ID token minting
//!
//! # Usage
//!
//! ```ignore
//! use keygate_broker::token::TokenService;
//!
//! let service = TokenService::new(storage, connectors, keys, config);
//! let response = service.exchange_code(&request, &credentials, now).await?;
//! ```

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::BrokerConfig;
use crate::connector::{ConnectorRegistry, ConnectorScopes};
use crate::oauth::token::{ClientCredentials, GrantType, TokenRequest, TokenResponse};
use crate::secret;
use crate::storage::{AuthCodeStorage, ClientStorage, RefreshTokenStorage, Storage};
use crate::token::jwt::{AccessTokenClaims, FederatedClaims, IdTokenClaims, KeyStore};
use crate::types::{Claims, Client, Identity, RefreshToken};
use crate::{AuthError, AuthResult};

/// Encodes the `sub` claim for a user at a connector.
///
/// The value is the protobuf encoding of `{1: user_id, 2: connector_id}`,
/// base64url without padding, so two connectors never produce the same
/// subject for the same upstream user ID.
#[must_use]
pub fn encode_subject(user_id: &str, connector_id: &str) -> String {
    fn put_field(buf: &mut Vec<u8>, tag: u8, value: &str) {
        buf.push(tag);
        let mut len = value.len();
        while len >= 0x80 {
            buf.push((len as u8 & 0x7f) | 0x80);
            len >>= 7;
        }
        buf.push(len as u8);
        buf.extend_from_slice(value.as_bytes());
    }

    let mut buf = Vec::with_capacity(user_id.len() + connector_id.len() + 6);
    put_field(&mut buf, 0x0a, user_id);
    put_field(&mut buf, 0x12, connector_id);
    URL_SAFE_NO_PAD.encode(buf)
}

/// What a token response is minted from.
struct Grant<'a> {
    client_id: &'a str,
    claims: &'a Claims,
    scopes: &'a [String],
    nonce: Option<&'a str>,
    connector_id: &'a str,
}

impl Grant<'_> {
    fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Issues tokens at the token endpoint.
#[derive(Clone)]
pub struct TokenService {
    storage: Arc<dyn Storage>,
    connectors: Arc<ConnectorRegistry>,
    keys: Arc<KeyStore>,
    config: Arc<BrokerConfig>,
}

impl TokenService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        connectors: Arc<ConnectorRegistry>,
        keys: Arc<KeyStore>,
        config: Arc<BrokerConfig>,
    ) -> Self {
        Self {
            storage,
            connectors,
            keys,
            config,
        }
    }

    /// The signing key store.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Dispatches a token request on its `grant_type`.
    ///
    /// # Errors
    ///
    /// `UnsupportedGrantType` for anything but `authorization_code` and
    /// `refresh_token`, otherwise whatever the grant handler reports.
    pub async fn handle(
        &self,
        request: &TokenRequest,
        credentials: &ClientCredentials,
        now: OffsetDateTime,
    ) -> AuthResult<TokenResponse> {
        match request.grant_type.parse::<GrantType>()? {
            GrantType::AuthorizationCode => self.exchange_code(request, credentials, now).await,
            GrantType::RefreshToken => {
                self.exchange_refresh_token(request, credentials, now).await
            }
        }
    }

    /// Authenticates the client. Public clients need no secret.
    async fn authenticate_client(&self, credentials: &ClientCredentials) -> AuthResult<Client> {
        let client = self
            .storage
            .get_client(&credentials.client_id)
            .await?
            .ok_or_else(|| AuthError::invalid_client("Invalid client credentials"))?;

        if client.public {
            return Ok(client);
        }
        match credentials.client_secret.as_deref() {
            Some(presented) if client.verify_secret(presented) => Ok(client),
            _ => {
                tracing::warn!(client_id = %client.id, "Client secret mismatch");
                Err(AuthError::invalid_client("Invalid client credentials"))
            }
        }
    }

    /// Redeems an authorization code.
    ///
    /// The code is removed from storage before any other check, so a failed
    /// redemption still burns it.
    ///
    /// # Errors
    ///
    /// - `InvalidClient` for bad client credentials or a failed PKCE check
    /// - `InvalidRequest` for a missing code
    /// - `InvalidGrant` for unknown, reused, expired or foreign codes and
    ///   redirect URI mismatches
    pub async fn exchange_code(
        &self,
        request: &TokenRequest,
        credentials: &ClientCredentials,
        now: OffsetDateTime,
    ) -> AuthResult<TokenResponse> {
        let client = self.authenticate_client(credentials).await?;

        let code_value = request
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::invalid_request("Missing code parameter"))?;

        let code_hash = secret::sha256_hex(code_value);
        let Some(code) = self.storage.take_auth_code(&code_hash).await? else {
            tracing::warn!(client_id = %client.id, "Unknown or redeemed authorization code");
            return Err(AuthError::invalid_grant("Invalid or expired code"));
        };

        if code.client_id != client.id {
            tracing::warn!(
                client_id = %client.id,
                issued_to = %code.client_id,
                "Authorization code presented by another client"
            );
            return Err(AuthError::invalid_grant("Invalid or expired code"));
        }

        let verifier = request.code_verifier.as_deref().filter(|v| !v.is_empty());
        match (&code.pkce, verifier) {
            (Some(challenge), Some(verifier)) => {
                challenge
                    .verify(verifier)
                    .map_err(|_| AuthError::invalid_client("Invalid code_verifier"))?;
            }
            (Some(_), None) => {
                return Err(AuthError::invalid_client("Missing code_verifier"));
            }
            (None, Some(_)) => {
                return Err(AuthError::invalid_request(
                    "No PKCE challenge was sent for this code",
                ));
            }
            (None, None) if client.public => {
                return Err(AuthError::invalid_client("Public clients must use PKCE"));
            }
            (None, None) => {}
        }

        if request.redirect_uri.as_deref() != Some(code.redirect_uri.as_str()) {
            return Err(AuthError::invalid_grant(
                "redirect_uri did not match the authorization request",
            ));
        }

        if code.is_expired(now) {
            return Err(AuthError::invalid_grant("Invalid or expired code"));
        }

        let grant = Grant {
            client_id: &client.id,
            claims: &code.claims,
            scopes: &code.scopes,
            nonce: code.nonce.as_deref(),
            connector_id: &code.connector_id,
        };
        let mut response = self.mint(&grant, now)?;

        if grant.has_scope("offline_access") {
            let secret_value = secret::new_token();
            let token = RefreshToken {
                id: secret::new_id(),
                secret_hash: secret::sha256_hex(&secret_value),
                client_id: client.id.clone(),
                claims: code.claims.clone(),
                scopes: code.scopes.clone(),
                nonce: code.nonce.clone(),
                connector_id: code.connector_id.clone(),
                connector_data: code.connector_data.clone(),
                created_at: now,
                last_used: now,
                expiry: now + self.config.expiry.refresh_token,
            };
            let value = RefreshToken::encode_value(&token.id, &secret_value);
            self.storage.create_refresh_token(token).await?;
            response = response.with_refresh_token(value);
        }

        tracing::info!(
            client_id = %client.id,
            connector_id = %code.connector_id,
            "Exchanged authorization code"
        );
        Ok(response)
    }

    /// Redeems a refresh token.
    ///
    /// When the connector rotates refresh tokens, the presented secret is
    /// replaced in the same storage update that records the redemption, and
    /// the old value stops working even if the response never reaches the
    /// client.
    ///
    /// # Errors
    ///
    /// - `InvalidClient` for bad client credentials
    /// - `InvalidRequest` for a missing token
    /// - `InvalidGrant` for unknown, expired, foreign or superseded tokens,
    ///   and when the upstream no longer vouches for the user
    /// - `InvalidScope` when asking for scopes outside the original grant
    pub async fn exchange_refresh_token(
        &self,
        request: &TokenRequest,
        credentials: &ClientCredentials,
        now: OffsetDateTime,
    ) -> AuthResult<TokenResponse> {
        let client = self.authenticate_client(credentials).await?;

        let presented = request
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::invalid_request("Missing refresh_token parameter"))?;

        let invalid =
            || AuthError::invalid_grant("Refresh token is invalid or has already been claimed");

        let (id, presented_secret) = RefreshToken::decode_value(presented).ok_or_else(invalid)?;
        let token = self
            .storage
            .get_refresh_token(id)
            .await?
            .ok_or_else(invalid)?;

        if token.client_id != client.id {
            tracing::warn!(
                client_id = %client.id,
                issued_to = %token.client_id,
                "Refresh token presented by another client"
            );
            return Err(invalid());
        }
        if !token.matches_secret(presented_secret) {
            tracing::warn!(
                client_id = %client.id,
                refresh_id = %token.id,
                "Superseded refresh token presented"
            );
            return Err(invalid());
        }
        if token.is_expired(now) {
            return Err(AuthError::invalid_grant("Refresh token expired"));
        }

        let scopes = match request.requested_scopes() {
            Some(requested) => {
                if let Some(extra) = requested.iter().find(|s| !token.scopes.contains(s)) {
                    return Err(AuthError::invalid_scope(format!(
                        "Scope {extra} was not part of the original grant"
                    )));
                }
                requested
            }
            None => token.scopes.clone(),
        };

        let connector = self
            .connectors
            .get(&token.connector_id)
            .ok_or_else(|| {
                tracing::warn!(connector_id = %token.connector_id, "Refresh for removed connector");
                AuthError::invalid_grant("Connector no longer available")
            })?;

        // The hook sees the original grant; narrowing only applies to the
        // minted tokens.
        let mut identity = Identity::from_parts(token.claims.clone(), token.connector_data.clone());
        if let Some(hook) = &connector.refresh {
            identity = hook
                .refresh(ConnectorScopes::from_scopes(&token.scopes), identity)
                .await
                .map_err(|e| {
                    tracing::warn!(
                        connector_id = %connector.id,
                        error = %e,
                        "Upstream refused to refresh identity"
                    );
                    AuthError::invalid_grant("Upstream identity is no longer valid")
                })?;
        }

        let next_secret = connector.rotate_refresh_tokens.then(secret::new_token);
        let expected_hash = token.secret_hash.clone();
        let new_hash = next_secret.as_deref().map(secret::sha256_hex);
        let claims = identity.claims.clone();
        let connector_data = identity.connector_data.clone();

        let updated = self
            .storage
            .update_refresh_token(
                &token.id,
                Box::new(move |mut stored| {
                    // Another redemption got here first.
                    if stored.secret_hash != expected_hash {
                        return Err(AuthError::invalid_grant(
                            "Refresh token is invalid or has already been claimed",
                        ));
                    }
                    if let Some(hash) = new_hash {
                        stored.secret_hash = hash;
                    }
                    stored.claims = claims;
                    stored.connector_data = connector_data;
                    stored.last_used = now;
                    Ok(stored)
                }),
            )
            .await?
            .ok_or_else(invalid)?;

        let grant = Grant {
            client_id: &client.id,
            claims: &updated.claims,
            scopes: &scopes,
            nonce: updated.nonce.as_deref(),
            connector_id: &updated.connector_id,
        };
        let response = self.mint(&grant, now)?;

        let value = match next_secret {
            Some(secret_value) => RefreshToken::encode_value(&updated.id, &secret_value),
            None => presented.to_string(),
        };

        tracing::info!(
            client_id = %client.id,
            connector_id = %updated.connector_id,
            rotated = connector.rotate_refresh_tokens,
            "Refreshed tokens"
        );
        Ok(response.with_refresh_token(value))
    }

    fn mint(&self, grant: &Grant<'_>, now: OffsetDateTime) -> AuthResult<TokenResponse> {
        let lifetime = self.config.expiry.id_token;
        let exp = (now + lifetime).unix_timestamp();
        let iat = now.unix_timestamp();
        let sub = encode_subject(&grant.claims.user_id, grant.connector_id);
        let scope = grant.scopes.join(" ");

        let access_claims = AccessTokenClaims {
            iss: self.keys.issuer().to_string(),
            sub: sub.clone(),
            aud: vec![grant.client_id.to_string()],
            exp,
            iat,
            jti: Uuid::new_v4().to_string(),
            scope: scope.clone(),
            client_id: grant.client_id.to_string(),
        };
        let access_token = self
            .keys
            .sign(&access_claims)
            .map_err(|e| AuthError::internal(format!("Failed to encode access token: {e}")))?;

        let claims = grant.claims;
        let id_claims = IdTokenClaims {
            iss: self.keys.issuer().to_string(),
            sub,
            aud: grant.client_id.to_string(),
            exp,
            iat,
            nonce: grant.nonce.map(str::to_string),
            at_hash: Some(self.keys.active_algorithm().half_hash(&access_token)),
            email: grant.has_scope("email").then(|| claims.email.clone()),
            email_verified: grant.has_scope("email").then_some(claims.email_verified),
            name: grant.has_scope("profile").then(|| claims.username.clone()),
            preferred_username: grant
                .has_scope("profile")
                .then(|| claims.preferred_username.clone())
                .flatten(),
            groups: grant.has_scope("groups").then(|| claims.groups.clone()),
            federated_claims: grant.has_scope("federated:id").then(|| FederatedClaims {
                connector_id: grant.connector_id.to_string(),
                user_id: claims.user_id.clone(),
            }),
        };
        let id_token = self
            .keys
            .sign(&id_claims)
            .map_err(|e| AuthError::internal(format!("Failed to encode ID token: {e}")))?;

        Ok(TokenResponse::new(
            access_token,
            id_token,
            lifetime.as_secs(),
            scope,
        ))
    }
}
