//! Health endpoint.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::BrokerState;

/// `GET /healthz`
///
/// 200 when every check passed its last run, 500 otherwise. The body lists
/// each check either way.
pub async fn healthz_handler(State(state): State<BrokerState>) -> impl IntoResponse {
    let status = state.health.status();
    let code = if status.healthy {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (code, Json(status))
}
