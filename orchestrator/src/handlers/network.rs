use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use stark_common::types::{DEFAULT_NAMESPACE, PolicyAction};
use stark_common::{Error, error::ok};
use stark_store::policies::{self, NewPolicy};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePolicyRequest {
    pub source_service: String,
    pub target_service: String,
    pub action: PolicyAction,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyListQuery {
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRequestBody {
    /// Either field name is accepted for the caller.
    #[serde(default)]
    pub caller_service_id: Option<Uuid>,
    #[serde(default)]
    pub source_service_id: Option<Uuid>,
    pub target_service_id: Uuid,
}

/// `POST /api/network/policies`: one policy per (source, target, namespace).
pub async fn create_policy(
    State(state): State<AppState>,
    Json(req): Json<CreatePolicyRequest>,
) -> Result<impl IntoResponse, Error> {
    if req.source_service.is_empty() || req.target_service.is_empty() {
        return Err(Error::Validation(
            "source and target service names are required".into(),
        ));
    }
    let policy = policies::create(
        &state.store,
        Uuid::new_v4(),
        NewPolicy {
            source_service: req.source_service,
            target_service: req.target_service,
            action: req.action,
            namespace: req
                .namespace
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
        },
    )
    .await?;
    // The routing worker also reacts to the change event; syncing here just
    // makes the new rule visible to the next request without a tick.
    state.routing.sync_policies().await?;
    Ok((axum::http::StatusCode::CREATED, ok(policy)))
}

/// `GET /api/network/policies`
pub async fn list_policies(
    State(state): State<AppState>,
    Query(query): Query<PolicyListQuery>,
) -> Result<impl IntoResponse, Error> {
    Ok(ok(
        policies::list(&state.store, query.namespace.as_deref()).await?,
    ))
}

/// `DELETE /api/network/policies/{id}`
pub async fn delete_policy(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    policies::delete(&state.store, Uuid::new_v4(), id).await?;
    state.routing.sync_policies().await?;
    Ok(ok(json!({ "deleted": id })))
}

/// `GET /api/network/registry`: the live endpoint map.
pub async fn registry(State(state): State<AppState>) -> impl IntoResponse {
    ok(state.routing.registry.snapshot())
}

/// `POST /api/network/route`: resolution for pods on cache miss.
pub async fn route(
    State(state): State<AppState>,
    Json(req): Json<RouteRequestBody>,
) -> Result<impl IntoResponse, Error> {
    let source = req
        .caller_service_id
        .or(req.source_service_id)
        .ok_or_else(|| Error::Validation("callerServiceId is required".into()))?;
    let resolution = state.routing.resolve(source, req.target_service_id).await?;
    Ok(ok(resolution))
}
