use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use serde_json::json;

use crate::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `GET /health`: overall status plus per-dependency checks.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = stark_store::services::list(&state.store, 0, 1).await.is_ok();
    let status = if store_ok { "ok" } else { "degraded" };
    Json(json!({
        "status": status,
        "version": VERSION,
        "uptime": state.uptime_secs(),
        "checks": {
            "store": if store_ok { "ok" } else { "unavailable" },
            "agentConnections": state.connections.active_count(),
        }
    }))
}

/// `GET /ready`: can we serve traffic (store reachable)?
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    match stark_store::services::list(&state.store, 0, 1).await {
        Ok(_) => (axum::http::StatusCode::OK, "ready"),
        Err(_) => (axum::http::StatusCode::SERVICE_UNAVAILABLE, "not ready"),
    }
}

/// `GET /live`: the process is up.
pub async fn live() -> impl IntoResponse {
    "live"
}
