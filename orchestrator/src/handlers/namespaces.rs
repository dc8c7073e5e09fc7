use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use stark_common::types::{Labels, LimitRange, NamespacePhase, ResourceQuota};
use stark_common::{Error, Pagination, error::ok};
use stark_store::namespaces::{self, NamespacePatch, NewNamespace};
use stark_store::pods;
use uuid::Uuid;

use crate::auth::Principal;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNamespaceRequest {
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub resource_quota: Option<ResourceQuota>,
    #[serde(default)]
    pub limit_range: Option<LimitRange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchNamespaceRequest {
    #[serde(default)]
    pub labels: Option<Labels>,
    #[serde(default)]
    pub resource_quota: Option<Option<ResourceQuota>>,
    #[serde(default)]
    pub limit_range: Option<Option<LimitRange>>,
}

/// `POST /api/namespaces`
pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreateNamespaceRequest>,
) -> Result<impl IntoResponse, Error> {
    if req.name.is_empty()
        || !req
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(Error::Validation(
            "namespace names are lowercase alphanumerics and dashes".into(),
        ));
    }
    let ns = namespaces::create(
        &state.store,
        Uuid::new_v4(),
        NewNamespace {
            name: req.name,
            labels: req.labels,
            resource_quota: req.resource_quota,
            limit_range: req.limit_range,
            created_by: principal.id,
        },
    )
    .await?;
    Ok((axum::http::StatusCode::CREATED, ok(ns)))
}

/// `GET /api/namespaces`
pub async fn list(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<impl IntoResponse, Error> {
    Ok(ok(
        namespaces::list(&state.store, page.offset, page.effective_limit()).await?,
    ))
}

/// `GET /api/namespaces/name/{name}`
pub async fn get(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Error> {
    Ok(ok(namespaces::get(&state.store, &name).await?))
}

/// `PATCH /api/namespaces/name/{name}`: quota and label updates.
pub async fn patch(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<PatchNamespaceRequest>,
) -> Result<impl IntoResponse, Error> {
    let ns = namespaces::update(
        &state.store,
        Uuid::new_v4(),
        &name,
        NamespacePatch {
            labels: req.labels,
            resource_quota: req.resource_quota,
            limit_range: req.limit_range,
            ..Default::default()
        },
    )
    .await?;
    Ok(ok(ns))
}

/// `GET /api/namespaces/name/{name}/quota`: declared quota next to current
/// usage.
pub async fn quota(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let ns = namespaces::get(&state.store, &name).await?;
    let usage = pods::namespace_usage(&state.store, &name).await?;
    Ok(ok(json!({
        "quota": ns.resource_quota,
        "usage": {
            "pods": usage.pods,
            "cpu": usage.cpu,
            "memory": usage.memory,
            "storage": usage.storage,
        }
    })))
}

/// `DELETE /api/namespaces/name/{name}`: flips to Terminating, which blocks
/// admission; the sweep removes the record once every pod has stopped.
pub async fn delete(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let ns = namespaces::update(
        &state.store,
        Uuid::new_v4(),
        &name,
        NamespacePatch {
            phase: Some(NamespacePhase::Terminating),
            ..Default::default()
        },
    )
    .await?;
    Ok(ok(json!({ "terminating": ns.name })))
}
