use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use stark_common::types::{
    DEFAULT_NAMESPACE, Labels, PodResources, SchedulingConstraints, ServiceStatus, Toleration,
    Visibility,
};
use stark_common::{Error, Pagination, error::ok};
use stark_store::services::{self, NewService, ServicePatch};
use stark_store::{StoreError, namespaces, packs};
use uuid::Uuid;

use crate::auth::Principal;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceRequest {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub pack_name: String,
    #[serde(default)]
    pub pack_version: Option<String>,
    pub replicas: i32,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub exposed: bool,
    #[serde(default)]
    pub ingress_port: Option<u16>,
    #[serde(default)]
    pub scheduling: SchedulingConstraints,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub resource_requests: Option<PodResources>,
    #[serde(default)]
    pub pod_labels: Labels,
    #[serde(default)]
    pub allowed_sources: Vec<String>,
    #[serde(default)]
    pub follow_latest: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchServiceRequest {
    #[serde(default)]
    pub pack_version: Option<String>,
    #[serde(default)]
    pub replicas: Option<i32>,
    /// Only `active` (resume) and `paused` may be set from outside.
    #[serde(default)]
    pub status: Option<ServiceStatus>,
    #[serde(default)]
    pub scheduling: Option<SchedulingConstraints>,
    #[serde(default)]
    pub tolerations: Option<Vec<Toleration>>,
    #[serde(default)]
    pub resource_requests: Option<PodResources>,
    #[serde(default)]
    pub pod_labels: Option<Labels>,
    #[serde(default)]
    pub allowed_sources: Option<Vec<String>>,
    #[serde(default)]
    pub follow_latest: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleRequest {
    pub replicas: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposeRequest {
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityRequest {
    pub visibility: Visibility,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameQuery {
    #[serde(default)]
    pub namespace: Option<String>,
}

/// `POST /api/services`
pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreateServiceRequest>,
) -> Result<impl IntoResponse, Error> {
    if req.name.is_empty() {
        return Err(Error::Validation("service name must not be empty".into()));
    }
    if req.replicas < 0 {
        return Err(Error::Validation("replicas must be >= 0".into()));
    }
    if req.exposed && req.ingress_port.is_none() {
        return Err(Error::Validation(
            "an exposed service needs an ingressPort".into(),
        ));
    }
    let namespace = req.namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    match namespaces::get(&state.store, &namespace).await {
        Ok(ns) if ns.phase == stark_common::types::NamespacePhase::Terminating => {
            return Err(Error::Policy(format!("namespace {namespace} is terminating")));
        }
        Ok(_) => {}
        Err(StoreError::NotFound(_)) if namespace == DEFAULT_NAMESPACE => {}
        Err(StoreError::NotFound(_)) => {
            return Err(Error::NotFound(format!("namespace {namespace}")));
        }
        Err(e) => return Err(e.into()),
    }
    let visibility = req.visibility.unwrap_or(Visibility::Private);
    if visibility == Visibility::System && !principal.is_admin() {
        return Err(Error::Policy(
            "only admins may create system services".into(),
        ));
    }

    let pack = match &req.pack_version {
        Some(version) => packs::get_by_name_version(&state.store, &req.pack_name, version).await?,
        None => packs::latest(&state.store, &req.pack_name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("pack {}", req.pack_name)))?,
    };

    let svc = services::create(
        &state.store,
        Uuid::new_v4(),
        NewService {
            name: req.name,
            namespace,
            pack_id: pack.id,
            pack_name: pack.name.clone(),
            pack_version: pack.version.clone(),
            replicas: req.replicas,
            visibility,
            exposed: req.exposed,
            ingress_port: req.ingress_port,
            scheduling: req.scheduling,
            tolerations: req.tolerations,
            resource_requests: req.resource_requests.unwrap_or_default(),
            pod_labels: req.pod_labels,
            allowed_sources: req.allowed_sources,
            follow_latest: req.follow_latest,
            created_by: principal.id,
        },
    )
    .await?;
    Ok((axum::http::StatusCode::CREATED, ok(svc)))
}

/// `GET /api/services`
pub async fn list(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<impl IntoResponse, Error> {
    Ok(ok(
        services::list(&state.store, page.offset, page.effective_limit()).await?,
    ))
}

/// `GET /api/services/name/{name}?namespace=`
pub async fn get_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<NameQuery>,
) -> Result<impl IntoResponse, Error> {
    let namespace = query.namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    Ok(ok(services::get_by_name(&state.store, &namespace, &name).await?))
}

/// `GET /api/services/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    Ok(ok(services::get_by_id(&state.store, id).await?))
}

fn check_mutable(
    svc: &stark_common::types::Service,
    principal: &Principal,
) -> Result<(), Error> {
    if svc.visibility == Visibility::System && !principal.is_admin() {
        return Err(Error::Policy("system services are admin-managed".into()));
    }
    if svc.created_by != principal.id && !principal.is_admin() {
        return Err(Error::Policy("not the service owner".into()));
    }
    Ok(())
}

/// `PATCH /api/services/{id}`: declarative updates. A patch that changes
/// nothing is a complete no-op: no event, no pods touched.
pub async fn patch(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(req): Json<PatchServiceRequest>,
) -> Result<impl IntoResponse, Error> {
    let svc = services::get_by_id(&state.store, id).await?;
    check_mutable(&svc, &principal)?;

    if let Some(status) = req.status
        && !matches!(status, ServiceStatus::Active | ServiceStatus::Paused)
    {
        return Err(Error::Validation(
            "status may only be set to active or paused".into(),
        ));
    }
    if let Some(version) = &req.pack_version {
        stark_common::parse_version(version)?;
        // The target version must exist before the reconciler chases it.
        packs::get_by_name_version(&state.store, &svc.pack_name, version).await?;
    }
    if let Some(replicas) = req.replicas
        && replicas < 0
    {
        return Err(Error::Validation("replicas must be >= 0".into()));
    }

    let patch = ServicePatch {
        pack_version: req.pack_version,
        replicas: req.replicas,
        status: req.status,
        scheduling: req.scheduling,
        tolerations: req.tolerations,
        resource_requests: req.resource_requests,
        pod_labels: req.pod_labels,
        allowed_sources: req.allowed_sources,
        follow_latest: req.follow_latest,
        ..Default::default()
    };
    if patch.is_noop_for(&svc) {
        return Ok(ok(svc));
    }
    let updated = services::update(&state.store, Uuid::new_v4(), id, patch).await?;
    Ok(ok(updated))
}

/// `POST /api/services/{id}/scale`
pub async fn scale(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(req): Json<ScaleRequest>,
) -> Result<impl IntoResponse, Error> {
    if req.replicas < 0 {
        return Err(Error::Validation("replicas must be >= 0".into()));
    }
    let svc = services::get_by_id(&state.store, id).await?;
    check_mutable(&svc, &principal)?;
    if svc.replicas == req.replicas {
        return Ok(ok(svc));
    }
    let updated = services::update(
        &state.store,
        Uuid::new_v4(),
        id,
        ServicePatch {
            replicas: Some(req.replicas),
            ..Default::default()
        },
    )
    .await?;
    Ok(ok(updated))
}

/// `POST /api/services/{id}/expose`
pub async fn expose(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(req): Json<ExposeRequest>,
) -> Result<impl IntoResponse, Error> {
    let svc = services::get_by_id(&state.store, id).await?;
    check_mutable(&svc, &principal)?;
    let port = req.port.or(svc.ingress_port).ok_or_else(|| {
        Error::Validation("service has no ingress port; provide one".into())
    })?;
    let updated = services::update(
        &state.store,
        Uuid::new_v4(),
        id,
        ServicePatch {
            exposed: Some(true),
            ingress_port: Some(Some(port)),
            ..Default::default()
        },
    )
    .await?;
    Ok(ok(updated))
}

/// `POST /api/services/{id}/unexpose`
pub async fn unexpose(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    let svc = services::get_by_id(&state.store, id).await?;
    check_mutable(&svc, &principal)?;
    let updated = services::update(
        &state.store,
        Uuid::new_v4(),
        id,
        ServicePatch {
            exposed: Some(false),
            ..Default::default()
        },
    )
    .await?;
    Ok(ok(updated))
}

/// `POST /api/services/{id}/visibility`
pub async fn visibility(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(req): Json<VisibilityRequest>,
) -> Result<impl IntoResponse, Error> {
    let svc = services::get_by_id(&state.store, id).await?;
    check_mutable(&svc, &principal)?;
    if req.visibility == Visibility::System && !principal.is_admin() {
        return Err(Error::Policy("only admins may mark services system".into()));
    }
    let updated = services::update(
        &state.store,
        Uuid::new_v4(),
        id,
        ServicePatch {
            visibility: Some(req.visibility),
            ..Default::default()
        },
    )
    .await?;
    Ok(ok(updated))
}

/// `DELETE /api/services/{id}`: mark deleted; the reconciler stops owned
/// pods and then removes the record.
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    let svc = services::get_by_id(&state.store, id).await?;
    check_mutable(&svc, &principal)?;
    services::update(
        &state.store,
        Uuid::new_v4(),
        id,
        ServicePatch {
            status: Some(ServiceStatus::Deleted),
            ..Default::default()
        },
    )
    .await?;
    Ok(ok(json!({ "deleting": id })))
}
