//! `/auth/*` session endpoints, proxied to the auth collaborator.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use stark_common::Error;

use crate::state::AppState;

/// `POST /auth/{action}`: login, logout, refresh, register, ...
pub async fn proxy(
    State(state): State<AppState>,
    Path(action): Path<String>,
    body: Option<Json<serde_json::Value>>,
) -> Result<impl IntoResponse, Error> {
    if !action.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::Validation("unknown auth action".into()));
    }
    let body = body.map(|Json(v)| v).unwrap_or(serde_json::json!({}));
    let (status, response) = state.auth.proxy_session(&action, body).await?;
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    Ok((status, Json(response)))
}
