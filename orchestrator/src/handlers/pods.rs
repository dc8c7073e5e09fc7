use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use stark_common::types::{
    DEFAULT_NAMESPACE, Labels, PodResources, PRIORITY_MAX, PRIORITY_MIN,
    SchedulingConstraints, Toleration,
};
use stark_common::{Error, error::ok};
use stark_store::pods::{self, NewPod, PodFilter};
use stark_store::{StoreError, namespaces, packs};
use uuid::Uuid;

use crate::auth::Principal;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePodRequest {
    pub pack_name: String,
    /// Omitted means the latest registered version.
    #[serde(default)]
    pub pack_version: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub scheduling: SchedulingConstraints,
    #[serde(default)]
    pub resource_requests: Option<PodResources>,
    #[serde(default)]
    pub resource_limits: Option<PodResources>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodListQuery {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub service_id: Option<Uuid>,
    #[serde(default)]
    pub node_id: Option<Uuid>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    pub target_version: String,
}

/// `POST /api/pods`: a free pod managed directly, not owned by a service.
pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreatePodRequest>,
) -> Result<impl IntoResponse, Error> {
    let namespace = req.namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    let priority = req.priority.unwrap_or(0);
    if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
        return Err(Error::Validation(format!(
            "priority must be within {PRIORITY_MIN}..={PRIORITY_MAX}"
        )));
    }

    let pack = match &req.pack_version {
        Some(version) => packs::get_by_name_version(&state.store, &req.pack_name, version).await?,
        None => packs::latest(&state.store, &req.pack_name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("pack {}", req.pack_name)))?,
    };

    // Namespace admission: Terminating blocks new pods; the limit range
    // fills in missing requests.
    let mut requests = req.resource_requests.unwrap_or_default();
    match namespaces::get(&state.store, &namespace).await {
        Ok(ns) => {
            if ns.phase == stark_common::types::NamespacePhase::Terminating {
                return Err(Error::Policy(format!(
                    "namespace {namespace} is terminating"
                )));
            }
            if let Some(limits) = ns.limit_range {
                if requests.cpu == 0 {
                    requests.cpu = limits.default_cpu.unwrap_or(0);
                }
                if requests.memory == 0 {
                    requests.memory = limits.default_memory.unwrap_or(0);
                }
            }
        }
        Err(StoreError::NotFound(_)) if namespace == DEFAULT_NAMESPACE => {}
        Err(StoreError::NotFound(_)) => {
            return Err(Error::NotFound(format!("namespace {namespace}")));
        }
        Err(e) => return Err(e.into()),
    }

    let pod = pods::create(
        &state.store,
        Uuid::new_v4(),
        NewPod {
            pack_id: pack.id,
            pack_version: pack.version.clone(),
            namespace,
            priority,
            labels: req.labels,
            tolerations: req.tolerations,
            scheduling: req.scheduling,
            resource_requests: requests,
            resource_limits: req.resource_limits,
            created_by: principal.id,
            service_id: None,
        },
    )
    .await?;
    Ok((axum::http::StatusCode::CREATED, ok(pod)))
}

/// `GET /api/pods`
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<PodListQuery>,
) -> Result<impl IntoResponse, Error> {
    let filter = PodFilter {
        namespace: query.namespace,
        service_id: query.service_id,
        node_id: query.node_id,
        statuses: None,
    };
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let items = pods::list(&state.store, &filter, query.offset, limit).await?;
    Ok(ok(items))
}

/// `GET /api/pods/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    Ok(ok(pods::get_by_id(&state.store, id).await?))
}

/// `GET /api/pods/{id}/status`
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    let pod = pods::get_by_id(&state.store, id).await?;
    Ok(ok(json!({
        "status": pod.status,
        "statusMessage": pod.status_message,
        "nodeId": pod.node_id,
        "startedAt": pod.started_at,
        "stoppedAt": pod.stopped_at,
    })))
}

/// `GET /api/pods/{id}/history`
pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    // 404 for a pod that never existed.
    pods::get_by_id(&state.store, id).await?;
    Ok(ok(pods::history(&state.store, id).await?))
}

/// `POST /api/pods/{id}/rollback`: replace a free pod with one running the
/// target version. Rolling back to the current version is a conflict and
/// leaves state untouched.
pub async fn rollback(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(req): Json<RollbackRequest>,
) -> Result<impl IntoResponse, Error> {
    let pod = pods::get_by_id(&state.store, id).await?;
    if pod.pack_version == req.target_version {
        return Err(Error::Conflict("SameVersion".into()));
    }
    if pod.service_id.is_some() {
        return Err(Error::Validation(
            "service-owned pods roll back through their service".into(),
        ));
    }
    let pack = packs::get_by_id(&state.store, pod.pack_id).await?;
    let target = packs::get_by_name_version(&state.store, &pack.name, &req.target_version).await?;

    let corr = Uuid::new_v4();
    let replacement = pods::create(
        &state.store,
        corr,
        NewPod {
            pack_id: target.id,
            pack_version: target.version.clone(),
            namespace: pod.namespace.clone(),
            priority: pod.priority,
            labels: pod.labels.clone(),
            tolerations: pod.tolerations.clone(),
            scheduling: pod.scheduling.clone(),
            resource_requests: pod.resource_requests,
            resource_limits: pod.resource_limits,
            created_by: principal.id,
            service_id: None,
        },
    )
    .await?;
    state
        .reconciler
        .stop_pod(corr, pod.id, &format!("rolled back to {}", target.version))
        .await?;
    Ok(ok(replacement))
}

/// `DELETE /api/pods/{id}`: graceful stop.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    pods::get_by_id(&state.store, id).await?;
    state
        .reconciler
        .stop_pod(Uuid::new_v4(), id, "deleted by operator")
        .await?;
    Ok(ok(json!({ "stopping": id })))
}
