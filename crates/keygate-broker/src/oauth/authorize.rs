//! Authorization endpoint types.
//!
//! Request parameters of `GET /auth` and the redirects sent back to clients.

use serde::Deserialize;
use url::Url;

use crate::error::AuthError;

/// Query parameters of an authorization request.
///
/// Every field defaults to empty so that missing parameters surface as
/// protocol errors rather than extractor rejections.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizationRequest {
    /// Must be `code`.
    #[serde(default)]
    pub response_type: String,

    /// Requesting client.
    #[serde(default)]
    pub client_id: String,

    /// Where to send the user agent afterwards. Must be registered.
    #[serde(default)]
    pub redirect_uri: String,

    /// Space-separated scopes. Must include `openid`.
    #[serde(default)]
    pub scope: String,

    /// Opaque client value echoed on the redirect.
    #[serde(default)]
    pub state: String,

    /// OIDC nonce, echoed in the ID token.
    #[serde(default)]
    pub nonce: Option<String>,

    /// PKCE challenge.
    #[serde(default)]
    pub code_challenge: Option<String>,

    /// PKCE method, `plain` when absent.
    #[serde(default)]
    pub code_challenge_method: Option<String>,

    /// Skips the selection page and goes straight to this connector.
    #[serde(default)]
    pub connector_id: Option<String>,
}

impl AuthorizationRequest {
    /// Requested scopes, deduplicated, in request order.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = Vec::new();
        for scope in self.scope.split_whitespace() {
            if !scopes.iter().any(|s| s == scope) {
                scopes.push(scope.to_string());
            }
        }
        scopes
    }

    /// The nonce, treating an empty value as absent.
    #[must_use]
    pub fn nonce(&self) -> Option<String> {
        self.nonce.clone().filter(|n| !n.is_empty())
    }
}

/// Successful authorization: a code for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResponse {
    /// Single-use authorization code.
    pub code: String,

    /// Client state from the original request.
    pub state: String,

    /// Verified redirect URI from the original request.
    pub redirect_uri: String,
}

impl AuthorizationResponse {
    /// Builds the redirect URL with response parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored redirect URI does not parse.
    pub fn to_redirect_url(&self) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.redirect_uri)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("code", &self.code);
            if !self.state.is_empty() {
                pairs.append_pair("state", &self.state);
            }
        }
        Ok(url)
    }
}

/// An authorization failure that may be reported to the client by redirect.
#[derive(Debug)]
pub struct AuthorizationRejection {
    /// What went wrong.
    pub error: AuthError,

    /// Verified redirect URI and client state, when the failure happened
    /// after the redirect URI was checked. `None` means the error must be
    /// shown directly to the user.
    pub redirect: Option<(String, String)>,
}

impl AuthorizationRejection {
    /// A failure that must render as an error page.
    #[must_use]
    pub fn page(error: AuthError) -> Self {
        Self {
            error,
            redirect: None,
        }
    }

    /// A failure to report to a verified redirect URI.
    #[must_use]
    pub fn redirect(error: AuthError, redirect_uri: &str, state: &str) -> Self {
        Self {
            error,
            redirect: Some((redirect_uri.to_string(), state.to_string())),
        }
    }

    /// Builds the error redirect, if this rejection may be redirected.
    #[must_use]
    pub fn to_redirect_url(&self) -> Option<Url> {
        let (redirect_uri, state) = self.redirect.as_ref()?;
        error_redirect_url(redirect_uri, &self.error, state).ok()
    }
}

impl From<AuthError> for AuthorizationRejection {
    fn from(error: AuthError) -> Self {
        Self::page(error)
    }
}

/// Builds `redirect_uri?error=...&error_description=...&state=...`.
///
/// # Errors
///
/// Returns an error if `redirect_uri` does not parse.
pub fn error_redirect_url(
    redirect_uri: &str,
    error: &AuthError,
    state: &str,
) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(redirect_uri)?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("error", error.oauth_error_code());
        pairs.append_pair("error_description", &error.public_description());
        if !state.is_empty() {
            pairs.append_pair("state", state);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_deduplicated() {
        let req = AuthorizationRequest {
            scope: "openid  email openid offline_access".to_string(),
            ..Default::default()
        };
        assert_eq!(req.scopes(), vec!["openid", "email", "offline_access"]);
    }

    #[test]
    fn test_success_redirect_keeps_existing_query() {
        let response = AuthorizationResponse {
            code: "abc".to_string(),
            state: "xyz".to_string(),
            redirect_uri: "https://app.example/cb?tenant=1".to_string(),
        };
        let url = response.to_redirect_url().unwrap();
        assert_eq!(url.query(), Some("tenant=1&code=abc&state=xyz"));
    }

    #[test]
    fn test_rejection_redirect() {
        let rejection = AuthorizationRejection::redirect(
            AuthError::unsupported_response_type("token"),
            "https://app.example/cb",
            "s1",
        );
        let url = rejection.to_redirect_url().unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("error".into(), "unsupported_response_type".into()));
        assert_eq!(pairs[2], ("state".into(), "s1".into()));

        assert!(
            AuthorizationRejection::page(AuthError::invalid_client("nope"))
                .to_redirect_url()
                .is_none()
        );
    }
}
