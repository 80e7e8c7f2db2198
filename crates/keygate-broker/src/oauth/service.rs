//! Authorization request state machine.
//!
//! An [`AuthRequest`] moves from `Created` to `Authenticated` when a
//! connector reports an identity, then is consumed into an authorization
//! code. Every transition goes through [`Storage`] updaters, so concurrent
//! attempts on the same request cannot both succeed.

use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;
use url::Url;

use crate::config::BrokerConfig;
use crate::connector::mock::RELAY_STATE_FIELD;
use crate::connector::{
    Connector, ConnectorError, ConnectorKind, ConnectorRegistry, ConnectorScopes,
};
use crate::oauth::authorize::{
    AuthorizationRejection, AuthorizationRequest, AuthorizationResponse, error_redirect_url,
};
use crate::oauth::pkce::PkceChallenge;
use crate::secret;
use crate::storage::{AuthCodeStorage, AuthRequestStorage, ClientStorage, Storage};
use crate::types::{AuthCode, AuthRequest, Identity};
use crate::{AuthError, AuthResult};

/// What the user agent does after a connector was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStep {
    /// Send the user agent to the upstream.
    Redirect(Url),
    /// Show a username/password form.
    PasswordPrompt {
        /// Connector that will check the credentials.
        connector_id: String,
        /// Label for the username field.
        prompt: String,
    },
}

/// Drives login attempts from the authorization request to the code.
#[derive(Clone)]
pub struct AuthorizationService {
    storage: Arc<dyn Storage>,
    connectors: Arc<ConnectorRegistry>,
    config: Arc<BrokerConfig>,
}

impl AuthorizationService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        connectors: Arc<ConnectorRegistry>,
        config: Arc<BrokerConfig>,
    ) -> Self {
        Self {
            storage,
            connectors,
            config,
        }
    }

    /// The connector registry.
    #[must_use]
    pub fn connectors(&self) -> &Arc<ConnectorRegistry> {
        &self.connectors
    }

    /// Validates an authorization request and persists it.
    ///
    /// # Errors
    ///
    /// Client, redirect URI and scope problems come back as page rejections.
    /// Problems found after the redirect URI was verified carry the redirect
    /// target.
    pub async fn create_request(
        &self,
        params: &AuthorizationRequest,
        now: OffsetDateTime,
    ) -> Result<AuthRequest, AuthorizationRejection> {
        let client = self
            .storage
            .get_client(&params.client_id)
            .await?
            .ok_or_else(|| {
                tracing::warn!(client_id = %params.client_id, "Authorization for unknown client");
                AuthError::invalid_client(format!("Unknown client: {}", params.client_id))
            })?;

        if !client.is_redirect_uri_allowed(&params.redirect_uri) {
            tracing::warn!(
                client_id = %client.id,
                redirect_uri = %params.redirect_uri,
                "Unregistered redirect URI"
            );
            return Err(AuthError::invalid_redirect_uri(&params.redirect_uri).into());
        }

        let redirect = |error: AuthError| {
            AuthorizationRejection::redirect(error, &params.redirect_uri, &params.state)
        };

        let scopes = params.scopes();
        if !scopes.iter().any(|s| s == "openid") {
            return Err(AuthError::invalid_scope("Missing required scope: openid").into());
        }
        if let Some(unknown) = scopes.iter().find(|s| !self.config.is_supported_scope(s)) {
            return Err(AuthError::invalid_scope(format!("Unsupported scope: {unknown}")).into());
        }

        if params.response_type != "code" {
            return Err(redirect(AuthError::unsupported_response_type(
                &params.response_type,
            )));
        }

        let pkce = match params.code_challenge.as_deref().filter(|c| !c.is_empty()) {
            Some(challenge) => Some(
                PkceChallenge::new(challenge, params.code_challenge_method.as_deref())
                    .map_err(|e| redirect(AuthError::invalid_request(e.to_string())))?,
            ),
            None if params.code_challenge_method.is_some() => {
                return Err(redirect(AuthError::invalid_request(
                    "code_challenge_method without code_challenge",
                )));
            }
            None => None,
        };
        if client.public && pkce.is_none() {
            return Err(redirect(AuthError::invalid_request(
                "Public clients must use PKCE",
            )));
        }

        let connector_id = params.connector_id.clone().filter(|id| !id.is_empty());
        if let Some(id) = &connector_id
            && self.connectors.get(id).is_none()
        {
            return Err(redirect(AuthError::invalid_request(format!(
                "Unknown connector: {id}"
            ))));
        }

        let expiry = now + self.config.expiry.auth_request;
        let request = AuthRequest {
            id: secret::new_id(),
            client_id: client.id.clone(),
            redirect_uri: params.redirect_uri.clone(),
            scopes,
            state: params.state.clone(),
            nonce: params.nonce(),
            pkce,
            connector_id,
            logged_in: false,
            claims: None,
            connector_data: None,
            expiry,
            created_at: now,
        };
        self.storage.create_auth_request(request.clone()).await?;

        tracing::debug!(
            client_id = %request.client_id,
            auth_request_id = %request.id,
            "Created auth request"
        );
        Ok(request)
    }

    /// Binds a request to a connector and returns the connector's login step.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown connectors and missing or expired requests,
    /// `InvalidState` if the request is already authenticated.
    pub async fn select_connector(
        &self,
        request_id: &str,
        connector_id: &str,
        now: OffsetDateTime,
    ) -> AuthResult<LoginStep> {
        let connector = self
            .connectors
            .get(connector_id)
            .ok_or_else(|| AuthError::not_found(format!("Unknown connector: {connector_id}")))?;

        let bound_id = connector.id.clone();
        let request = self
            .storage
            .update_auth_request(
                request_id,
                Box::new(move |mut req| {
                    if req.is_expired(now) {
                        return Err(AuthError::not_found("Auth request expired"));
                    }
                    if req.logged_in {
                        return Err(AuthError::invalid_state("Auth request already authenticated"));
                    }
                    req.connector_id = Some(bound_id);
                    Ok(req)
                }),
            )
            .await?
            .ok_or_else(|| AuthError::not_found("Unknown auth request"))?;

        tracing::debug!(
            auth_request_id = %request.id,
            connector_id = %connector.id,
            kind = connector.kind.as_str(),
            "Connector selected"
        );

        let scopes = ConnectorScopes::from_scopes(&request.scopes);
        let callback_url = self.config.callback_url();
        let step = match &connector.kind {
            ConnectorKind::Password(pw) => LoginStep::PasswordPrompt {
                connector_id: connector.id.clone(),
                prompt: pw.prompt().to_string(),
            },
            ConnectorKind::RedirectCallback(cb) => {
                LoginStep::Redirect(cb.login_url(scopes, &callback_url, &request.id)?)
            }
            ConnectorKind::PostCallback(post) => {
                LoginStep::Redirect(post.login_url(scopes, &callback_url, &request.id)?)
            }
        };
        Ok(step)
    }

    /// Checks credentials with a password connector.
    ///
    /// # Returns
    ///
    /// The client redirect on success, `Ok(None)` for wrong credentials.
    ///
    /// # Errors
    ///
    /// `NotFound` for missing or expired requests, `InvalidRequest` if the
    /// request is bound to another connector or the connector does not take
    /// passwords.
    pub async fn login_with_password(
        &self,
        request_id: &str,
        connector_id: &str,
        username: &str,
        password: &str,
        now: OffsetDateTime,
    ) -> AuthResult<Option<Url>> {
        let request = self
            .storage
            .get_auth_request(request_id)
            .await?
            .filter(|r| !r.is_expired(now))
            .ok_or_else(|| AuthError::not_found("Unknown auth request"))?;

        if request.connector_id.as_deref() != Some(connector_id) {
            return Err(AuthError::invalid_request(
                "Auth request is bound to another connector",
            ));
        }
        let connector = self
            .connectors
            .get(connector_id)
            .ok_or_else(|| AuthError::not_found(format!("Unknown connector: {connector_id}")))?;
        let ConnectorKind::Password(pw) = &connector.kind else {
            return Err(AuthError::invalid_request("Connector does not accept passwords"));
        };

        let scopes = ConnectorScopes::from_scopes(&request.scopes);
        let identity = match pw.login(scopes, username, password).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                tracing::warn!(
                    connector_id = %connector.id,
                    auth_request_id = %request.id,
                    "Rejected credentials"
                );
                return Ok(None);
            }
            Err(err) => {
                tracing::warn!(connector_id = %connector.id, error = %err, "Password check failed");
                return Err(err.into());
            }
        };

        self.complete_and_finalize(&request.id, &connector.id, identity, now)
            .await
            .map(Some)
    }

    /// Handles `GET /callback` from a redirect-callback connector.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if `state` does not resolve to a live request bound
    /// to a redirect-callback connector.
    pub async fn handle_callback(
        &self,
        query: &HashMap<String, String>,
        now: OffsetDateTime,
    ) -> AuthResult<Url> {
        let state = query.get("state").map(String::as_str).unwrap_or_default();
        let (request, connector) = self.resolve_callback(state, now).await?;

        let ConnectorKind::RedirectCallback(cb) = &connector.kind else {
            tracing::warn!(connector_id = %connector.id, "GET callback for non-redirect connector");
            return Err(AuthError::invalid_request("Connector does not use GET callbacks"));
        };

        let scopes = ConnectorScopes::from_scopes(&request.scopes);
        match cb
            .handle_callback(scopes, &self.config.callback_url(), query)
            .await
        {
            Ok(identity) => {
                self.complete_and_finalize(&request.id, &connector.id, identity, now)
                    .await
            }
            Err(err) => self.connector_failure(&request, &connector, err),
        }
    }

    /// Handles `POST /callback` from a post-callback connector.
    ///
    /// The relay state is matched against a live request before the
    /// connector sees the assertion.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if the relay state is missing or forged.
    pub async fn handle_post_callback(
        &self,
        form: &HashMap<String, String>,
        now: OffsetDateTime,
    ) -> AuthResult<Url> {
        let relay_state = form
            .get(RELAY_STATE_FIELD)
            .map(String::as_str)
            .unwrap_or_default();
        let (request, connector) = self.resolve_callback(relay_state, now).await?;

        let ConnectorKind::PostCallback(post) = &connector.kind else {
            tracing::warn!(connector_id = %connector.id, "POST callback for non-post connector");
            return Err(AuthError::invalid_request("Connector does not use POST callbacks"));
        };

        let scopes = ConnectorScopes::from_scopes(&request.scopes);
        match post.handle_post(scopes, form, &request.id).await {
            Ok(identity) => {
                self.complete_and_finalize(&request.id, &connector.id, identity, now)
                    .await
            }
            Err(err) => self.connector_failure(&request, &connector, err),
        }
    }

    /// Records the identity a connector reported.
    ///
    /// # Errors
    ///
    /// `NotFound` if the request is missing or expired, `InvalidRequest` if
    /// `connector_id` is not the bound connector, `InvalidState` if the
    /// request is already authenticated.
    pub async fn complete_connector_auth(
        &self,
        request_id: &str,
        connector_id: &str,
        identity: Identity,
        now: OffsetDateTime,
    ) -> AuthResult<AuthRequest> {
        let connector_id = connector_id.to_string();
        let request = self
            .storage
            .update_auth_request(
                request_id,
                Box::new(move |mut req| {
                    if req.is_expired(now) {
                        return Err(AuthError::not_found("Auth request expired"));
                    }
                    if req.connector_id.as_deref() != Some(connector_id.as_str()) {
                        return Err(AuthError::invalid_request(
                            "Identity reported by a connector the request is not bound to",
                        ));
                    }
                    if req.logged_in {
                        return Err(AuthError::invalid_state("Auth request already authenticated"));
                    }
                    req.logged_in = true;
                    req.claims = Some(identity.claims);
                    req.connector_data = identity.connector_data;
                    Ok(req)
                }),
            )
            .await?
            .ok_or_else(|| AuthError::not_found("Unknown auth request"))?;

        tracing::debug!(
            auth_request_id = %request.id,
            connector_id = ?request.connector_id,
            "Auth request authenticated"
        );
        Ok(request)
    }

    /// Consumes an authenticated request into an authorization code.
    ///
    /// # Errors
    ///
    /// `NotFound` if the request is missing, expired or was finalized
    /// concurrently, `InvalidState` if it is not authenticated.
    pub async fn finalize_to_code(
        &self,
        request_id: &str,
        now: OffsetDateTime,
    ) -> AuthResult<AuthorizationResponse> {
        let request = self
            .storage
            .get_auth_request(request_id)
            .await?
            .filter(|r| !r.is_expired(now))
            .ok_or_else(|| AuthError::not_found("Unknown auth request"))?;

        let expiry = now + self.config.expiry.auth_code;
        let value = secret::new_token();
        let code = AuthCode::from_request(&request, &value, now, expiry)
            .ok_or_else(|| AuthError::invalid_state("Auth request is not authenticated"))?;

        // Only the caller that removes the request may issue its code.
        if !self.storage.delete_auth_request(&request.id).await? {
            return Err(AuthError::not_found("Auth request already finalized"));
        }

        let response = AuthorizationResponse {
            code: value,
            state: request.state.clone(),
            redirect_uri: request.redirect_uri.clone(),
        };
        self.storage.create_auth_code(code).await?;

        tracing::info!(
            client_id = %request.client_id,
            connector_id = ?request.connector_id,
            "Issued authorization code"
        );
        Ok(response)
    }

    async fn complete_and_finalize(
        &self,
        request_id: &str,
        connector_id: &str,
        identity: Identity,
        now: OffsetDateTime,
    ) -> AuthResult<Url> {
        self.complete_connector_auth(request_id, connector_id, identity, now)
            .await?;
        let response = self.finalize_to_code(request_id, now).await?;
        response
            .to_redirect_url()
            .map_err(|e| AuthError::internal(format!("Stored redirect URI unusable: {e}")))
    }

    async fn resolve_callback(
        &self,
        state: &str,
        now: OffsetDateTime,
    ) -> AuthResult<(AuthRequest, Arc<Connector>)> {
        if state.is_empty() {
            return Err(AuthError::invalid_request("Missing state"));
        }

        // Unknown and expired requests are reported identically.
        let Some(request) = self
            .storage
            .get_auth_request(state)
            .await?
            .filter(|r| !r.is_expired(now))
        else {
            tracing::warn!("Callback with unknown or expired state");
            return Err(AuthError::invalid_request("Invalid or expired state"));
        };

        let connector = request
            .connector_id
            .as_deref()
            .and_then(|id| self.connectors.get(id))
            .ok_or_else(|| {
                tracing::warn!(
                    auth_request_id = %request.id,
                    "Callback for request without live connector"
                );
                AuthError::invalid_request("Invalid or expired state")
            })?;

        Ok((request, connector))
    }

    fn connector_failure(
        &self,
        request: &AuthRequest,
        connector: &Connector,
        err: ConnectorError,
    ) -> AuthResult<Url> {
        tracing::warn!(
            connector_id = %connector.id,
            auth_request_id = %request.id,
            error = %err,
            "Connector rejected login"
        );
        let err = AuthError::from(err);
        if !matches!(err, AuthError::AccessDenied { .. }) {
            return Err(err);
        }
        error_redirect_url(&request.redirect_uri, &err, &request.state)
            .map_err(|e| AuthError::internal(format!("Stored redirect URI unusable: {e}")))
    }
}
