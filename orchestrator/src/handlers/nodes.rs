use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use stark_common::types::{Labels, NodeResources, RuntimeType, Taint};
use stark_common::{Error, Pagination, error::ok};
use stark_common::protocol::ServerFrame;
use stark_store::nodes::{self, NewNode, NodePatch};
use uuid::Uuid;

use crate::auth::Principal;
use crate::registry::NODE_NAME_LABEL;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeRequest {
    pub name: String,
    pub runtime_type: RuntimeType,
    #[serde(default)]
    pub runtime_version: Option<String>,
    pub allocatable: NodeResources,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub taints: Vec<Taint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchNodeRequest {
    #[serde(default)]
    pub labels: Option<Labels>,
    #[serde(default)]
    pub taints: Option<Vec<Taint>>,
    #[serde(default)]
    pub unschedulable: Option<bool>,
}

/// `POST /api/nodes`: pre-register a node record before its agent dials in.
pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreateNodeRequest>,
) -> Result<impl IntoResponse, Error> {
    if req.name.is_empty() {
        return Err(Error::Validation("node name must not be empty".into()));
    }
    let mut labels = req.labels;
    labels.insert(NODE_NAME_LABEL.to_string(), req.name.clone());
    let node = nodes::create(
        &state.store,
        Uuid::new_v4(),
        NewNode {
            name: req.name,
            runtime_type: req.runtime_type,
            runtime_version: req.runtime_version,
            allocatable: req.allocatable,
            labels,
            taints: req.taints,
            registered_by: principal.id,
            connection_id: None,
        },
    )
    .await?;
    Ok((axum::http::StatusCode::CREATED, ok(node)))
}

/// `GET /api/nodes`
pub async fn list(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<impl IntoResponse, Error> {
    Ok(ok(
        nodes::list(&state.store, page.offset, page.effective_limit()).await?,
    ))
}

/// `GET /api/nodes/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    Ok(ok(nodes::get_by_id(&state.store, id).await?))
}

/// `GET /api/nodes/name/{name}`
pub async fn get_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Error> {
    Ok(ok(nodes::get_by_name(&state.store, &name).await?))
}

/// `PATCH /api/nodes/{id}`: labels, taints, cordon flag. Connected agents
/// learn the new configuration immediately.
pub async fn patch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<PatchNodeRequest>,
) -> Result<impl IntoResponse, Error> {
    let current = nodes::get_by_id(&state.store, id).await?;
    let labels = req.labels.map(|mut labels| {
        // The pin label is registry-owned; keep it stable across patches.
        labels.insert(NODE_NAME_LABEL.to_string(), current.name.clone());
        labels
    });
    let node = nodes::update(
        &state.store,
        Uuid::new_v4(),
        id,
        NodePatch {
            labels,
            taints: req.taints,
            unschedulable: req.unschedulable,
            ..Default::default()
        },
    )
    .await?;
    let _ = state
        .connections
        .send_to_node(
            node.id,
            ServerFrame::NodeConfig {
                labels: node.labels.clone(),
                taints: node.taints.clone(),
            },
        )
        .await;
    Ok(ok(node))
}

/// `POST /api/nodes/{id}/drain`: cordon plus staged eviction.
pub async fn drain(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    Ok(ok(state.registry.drain(Uuid::new_v4(), id).await?))
}

/// `DELETE /api/nodes/{id}`: evict everything, then soft-delete.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    let node = state.registry.delete(Uuid::new_v4(), id).await?;
    Ok(ok(json!({ "deleted": node.id })))
}
