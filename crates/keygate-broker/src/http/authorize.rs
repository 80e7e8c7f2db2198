//! Authorization endpoint and connector login handlers.
//!
//! # Flow
//!
//! ```text
//! GET /auth?client_id=...&redirect_uri=...
//!     ├─► Invalid client/redirect_uri/scope → Render error page (no redirect)
//!     ├─► Other protocol errors → Redirect with error=...
//!     ├─► connector_id given or single connector → Start that connector
//!     └─► Render connector selection
//!
//! GET /auth/{connector}?req=...
//!     ├─► Redirect connector → 302 to upstream login URL
//!     └─► Password connector → Render login form
//!
//! POST /auth/{connector}/login?req=... (form data)
//!     ├─► Success → 302 to client with code
//!     └─► Wrong credentials → Re-render form (401)
//! ```

use axum::Form;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;
use time::OffsetDateTime;

use super::templates::{ConnectorLink, render_connector_selection, render_password_form};
use super::{BrokerState, error_page, found};
use crate::connector::ConnectorKind;
use crate::error::AuthError;
use crate::oauth::{AuthorizationRejection, AuthorizationRequest, LoginStep};

/// `?req=` parameter naming the auth request.
#[derive(Debug, Deserialize)]
pub struct RequestParam {
    /// Auth request ID.
    #[serde(default)]
    pub req: String,
}

/// Password form fields.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    /// Username as typed.
    #[serde(default)]
    pub login: String,
    /// Password as typed.
    #[serde(default)]
    pub password: String,
}

/// `GET /auth`
pub async fn authorize_handler(
    State(state): State<BrokerState>,
    Query(params): Query<AuthorizationRequest>,
) -> Response {
    let now = OffsetDateTime::now_utc();
    let request = match state.authorization.create_request(&params, now).await {
        Ok(request) => request,
        Err(rejection) => return rejection_response(rejection),
    };

    if let Some(connector_id) = request.connector_id.as_deref() {
        return start_login(&state, &request.id, connector_id, now).await;
    }

    let connectors = state.authorization.connectors().list();
    match connectors.as_slice() {
        [] => error_page(&AuthError::configuration("No connectors configured")),
        [only] => start_login(&state, &request.id, &only.id, now).await,
        _ => {
            let base = state.config.issuer_path();
            let links: Vec<ConnectorLink> = connectors
                .iter()
                .map(|c| ConnectorLink {
                    name: c.name.clone(),
                    href: format!(
                        "{base}/auth/{}?req={}",
                        urlencoding::encode(&c.id),
                        request.id
                    ),
                })
                .collect();
            Html(render_connector_selection(&links)).into_response()
        }
    }
}

/// `GET /auth/{connector}`
pub async fn connector_login_handler(
    State(state): State<BrokerState>,
    Path(connector_id): Path<String>,
    Query(params): Query<RequestParam>,
) -> Response {
    start_login(&state, &params.req, &connector_id, OffsetDateTime::now_utc()).await
}

/// `POST /auth/{connector}/login`
pub async fn password_login_handler(
    State(state): State<BrokerState>,
    Path(connector_id): Path<String>,
    Query(params): Query<RequestParam>,
    Form(form): Form<LoginForm>,
) -> Response {
    let now = OffsetDateTime::now_utc();
    match state
        .authorization
        .login_with_password(&params.req, &connector_id, &form.login, &form.password, now)
        .await
    {
        Ok(Some(redirect)) => found(redirect.as_str()),
        Ok(None) => {
            let prompt = password_prompt(&state, &connector_id);
            let message = format!("Invalid {prompt} and password.");
            (
                StatusCode::UNAUTHORIZED,
                Html(render_password_form(
                    &prompt,
                    &login_action(&state, &connector_id, &params.req),
                    &form.login,
                    Some(&message),
                )),
            )
                .into_response()
        }
        Err(err) => error_page(&err),
    }
}

async fn start_login(
    state: &BrokerState,
    request_id: &str,
    connector_id: &str,
    now: OffsetDateTime,
) -> Response {
    match state
        .authorization
        .select_connector(request_id, connector_id, now)
        .await
    {
        Ok(LoginStep::Redirect(url)) => found(url.as_str()),
        Ok(LoginStep::PasswordPrompt {
            connector_id,
            prompt,
        }) => Html(render_password_form(
            &prompt,
            &login_action(state, &connector_id, request_id),
            "",
            None,
        ))
        .into_response(),
        Err(err) => error_page(&err),
    }
}

fn rejection_response(rejection: AuthorizationRejection) -> Response {
    match rejection.to_redirect_url() {
        Some(url) => {
            tracing::debug!(
                error = %rejection.error,
                "Authorization rejected, redirecting to client"
            );
            found(url.as_str())
        }
        None => error_page(&rejection.error),
    }
}

fn login_action(state: &BrokerState, connector_id: &str, request_id: &str) -> String {
    format!(
        "{}/auth/{}/login?req={request_id}",
        state.config.issuer_path(),
        urlencoding::encode(connector_id)
    )
}

fn password_prompt(state: &BrokerState, connector_id: &str) -> String {
    state
        .authorization
        .connectors()
        .get(connector_id)
        .and_then(|c| match &c.kind {
            ConnectorKind::Password(pw) => Some(pw.prompt().to_string()),
            _ => None,
        })
        .unwrap_or_else(|| "Username".to_string())
}
