//! Mock connectors for development and tests.
//!
//! [`MockCallbackConnector`] skips the upstream entirely: its login URL is
//! the broker's own callback, so the browser comes straight back and is
//! logged in as a fixed user.
//!
//! [`MockPostConnector`] stands in for a SAML identity provider. The
//! assertion is base64-encoded JSON in the `SAMLResponse` form field.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use url::Url;

use super::{
    CallbackConnector, ConnectorError, ConnectorScopes, PostConnector, RefreshConnector,
};
use crate::types::{Claims, Identity};

/// Form field carrying the assertion.
pub const ASSERTION_FIELD: &str = "SAMLResponse";

/// Form field carrying the relay state.
pub const RELAY_STATE_FIELD: &str = "RelayState";

fn default_identity() -> Identity {
    Identity::new("0-385-28089-0")
        .with_username("Kilgore Trout")
        .with_email("kilgore@kilgore.trout", true)
        .with_groups(vec!["authors".to_string()])
}

// ============================================================================
// Redirect callback
// ============================================================================

/// Redirect-callback connector that authenticates a fixed identity.
#[derive(Debug, Clone)]
pub struct MockCallbackConnector {
    identity: Identity,
}

impl Default for MockCallbackConnector {
    fn default() -> Self {
        Self {
            identity: default_identity(),
        }
    }
}

impl MockCallbackConnector {
    /// Creates a mock that logs everyone in as `identity`.
    #[must_use]
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl CallbackConnector for MockCallbackConnector {
    fn login_url(
        &self,
        _scopes: ConnectorScopes,
        callback_url: &str,
        state: &str,
    ) -> Result<Url, ConnectorError> {
        let mut url = Url::parse(callback_url)
            .map_err(|e| ConnectorError::Configuration(format!("bad callback url: {e}")))?;
        url.query_pairs_mut().append_pair("state", state);
        Ok(url)
    }

    async fn handle_callback(
        &self,
        _scopes: ConnectorScopes,
        _callback_url: &str,
        query: &HashMap<String, String>,
    ) -> Result<Identity, ConnectorError> {
        if let Some(error) = query.get("error") {
            return Err(ConnectorError::access_denied(error.clone()));
        }
        Ok(self.identity.clone())
    }
}

#[async_trait]
impl RefreshConnector for MockCallbackConnector {
    async fn refresh(
        &self,
        _scopes: ConnectorScopes,
        identity: Identity,
    ) -> Result<Identity, ConnectorError> {
        Ok(identity)
    }
}

// ============================================================================
// Post callback
// ============================================================================

/// Decoded mock assertion.
#[derive(Debug, Deserialize)]
struct MockAssertion {
    #[serde(flatten)]
    claims: Claims,
    /// Relay state the assertion was issued for, if the IdP echoes it.
    #[serde(default)]
    in_response_to: Option<String>,
    /// Anything other than `success` is a refusal.
    #[serde(default)]
    status: Option<String>,
}

/// Post-callback connector decoding JSON assertions.
#[derive(Debug, Clone)]
pub struct MockPostConnector {
    sso_url: Option<Url>,
}

impl MockPostConnector {
    /// Creates the connector. Without an `sso_url` the login URL points back
    /// at the broker's callback.
    #[must_use]
    pub fn new(sso_url: Option<Url>) -> Self {
        Self { sso_url }
    }

    /// Encodes claims the way a client of this connector must post them.
    #[must_use]
    pub fn encode_assertion(claims: &Claims, in_response_to: Option<&str>) -> String {
        let mut value = serde_json::to_value(claims).unwrap_or_default();
        if let (Some(relay), Some(obj)) = (in_response_to, value.as_object_mut()) {
            obj.insert("in_response_to".to_string(), relay.into());
        }
        STANDARD.encode(value.to_string())
    }
}

#[async_trait]
impl PostConnector for MockPostConnector {
    fn login_url(
        &self,
        _scopes: ConnectorScopes,
        callback_url: &str,
        relay_state: &str,
    ) -> Result<Url, ConnectorError> {
        let mut url = match &self.sso_url {
            Some(url) => url.clone(),
            None => Url::parse(callback_url)
                .map_err(|e| ConnectorError::Configuration(format!("bad callback url: {e}")))?,
        };
        url.query_pairs_mut()
            .append_pair(RELAY_STATE_FIELD, relay_state);
        Ok(url)
    }

    async fn handle_post(
        &self,
        _scopes: ConnectorScopes,
        form: &HashMap<String, String>,
        relay_state: &str,
    ) -> Result<Identity, ConnectorError> {
        let raw = form
            .get(ASSERTION_FIELD)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConnectorError::invalid_request("missing assertion"))?;

        let bytes = STANDARD
            .decode(raw.trim())
            .map_err(|_| ConnectorError::invalid_request("assertion is not base64"))?;
        let assertion: MockAssertion = serde_json::from_slice(&bytes)
            .map_err(|e| ConnectorError::invalid_request(format!("assertion unreadable: {e}")))?;

        if let Some(expected) = &assertion.in_response_to
            && expected != relay_state
        {
            return Err(ConnectorError::invalid_request(
                "assertion issued for another request",
            ));
        }
        if let Some(status) = &assertion.status
            && status != "success"
        {
            return Err(ConnectorError::access_denied(format!(
                "assertion status {status}"
            )));
        }
        if assertion.claims.user_id.is_empty() {
            return Err(ConnectorError::invalid_request("assertion has no subject"));
        }

        Ok(Identity::from_parts(assertion.claims, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_login_url_returns_to_callback() {
        let c = MockCallbackConnector::default();
        let url = c
            .login_url(
                ConnectorScopes::default(),
                "http://127.0.0.1:5556/dex/callback",
                "abc",
            )
            .unwrap();
        assert_eq!(url.path(), "/dex/callback");
        assert_eq!(url.query(), Some("state=abc"));
    }

    #[tokio::test]
    async fn test_mock_callback_error_is_access_denied() {
        let c = MockCallbackConnector::default();
        let mut query = HashMap::new();
        let identity = c
            .handle_callback(ConnectorScopes::default(), "", &query)
            .await
            .unwrap();
        assert_eq!(identity.claims.username, "Kilgore Trout");

        query.insert("error".to_string(), "access_denied".to_string());
        let err = c
            .handle_callback(ConnectorScopes::default(), "", &query)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn test_post_assertion() {
        let c = MockPostConnector::new(None);
        let claims = Claims {
            user_id: "u1".to_string(),
            username: "Jane".to_string(),
            email: "jane@example.com".to_string(),
            email_verified: true,
            ..Claims::default()
        };

        let mut form = HashMap::new();
        form.insert(
            ASSERTION_FIELD.to_string(),
            MockPostConnector::encode_assertion(&claims, Some("relay-1")),
        );

        let identity = c
            .handle_post(ConnectorScopes::default(), &form, "relay-1")
            .await
            .unwrap();
        assert_eq!(identity.claims, claims);

        let err = c
            .handle_post(ConnectorScopes::default(), &form, "relay-2")
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_post_rejects_garbage() {
        let c = MockPostConnector::new(None);
        let scopes = ConnectorScopes::default();

        let empty = HashMap::new();
        assert!(matches!(
            c.handle_post(scopes, &empty, "r").await,
            Err(ConnectorError::InvalidRequest(_))
        ));

        let mut form = HashMap::new();
        form.insert(ASSERTION_FIELD.to_string(), "%%%".to_string());
        assert!(matches!(
            c.handle_post(scopes, &form, "r").await,
            Err(ConnectorError::InvalidRequest(_))
        ));

        form.insert(
            ASSERTION_FIELD.to_string(),
            STANDARD.encode(r#"{"user_id":"u","status":"denied"}"#),
        );
        assert!(matches!(
            c.handle_post(scopes, &form, "r").await,
            Err(ConnectorError::AccessDenied(_))
        ));
    }
}
