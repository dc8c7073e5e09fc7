//! Service records: the declarative side the reconciler converges on.

use chrono::Utc;
use stark_common::types::{
    FailureState, Labels, PodResources, SchedulingConstraints, Service, ServiceStatus,
    Toleration, Visibility,
};
use stark_common::events::{ChangeAction, ChangeEvent, EntityKind};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult, enum_str, from_json, parse_enum};
use crate::Store;

const COLUMNS: &str = "id, name, namespace, pack_id, pack_name, pack_version, replicas, status, \
                       status_message, visibility, exposed, ingress_port, scheduling, \
                       tolerations, resource_requests, pod_labels, allowed_sources, \
                       follow_latest, failure_state, created_by, created_at, updated_at";

fn row_to_service(row: &Row) -> StoreResult<Service> {
    let ingress_port: Option<i32> = row.get("ingress_port");
    Ok(Service {
        id: row.get("id"),
        name: row.get("name"),
        namespace: row.get("namespace"),
        pack_id: row.get("pack_id"),
        pack_name: row.get("pack_name"),
        pack_version: row.get("pack_version"),
        replicas: row.get("replicas"),
        status: parse_enum::<ServiceStatus>("status", row.get("status"))?,
        status_message: row.get("status_message"),
        visibility: parse_enum::<Visibility>("visibility", row.get("visibility"))?,
        exposed: row.get("exposed"),
        ingress_port: ingress_port.map(|p| p as u16),
        scheduling: from_json::<SchedulingConstraints>("scheduling", row.get("scheduling"))?,
        tolerations: from_json::<Vec<Toleration>>("tolerations", row.get("tolerations"))?,
        resource_requests: from_json::<PodResources>(
            "resource_requests",
            row.get("resource_requests"),
        )?,
        pod_labels: from_json::<Labels>("pod_labels", row.get("pod_labels"))?,
        allowed_sources: from_json::<Vec<String>>(
            "allowed_sources",
            row.get("allowed_sources"),
        )?,
        follow_latest: row.get("follow_latest"),
        failure_state: from_json::<FailureState>("failure_state", row.get("failure_state"))?,
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn json<T: serde::Serialize>(v: &T) -> serde_json::Value {
    serde_json::to_value(v).expect("entity field serializes")
}

#[derive(Debug, Clone)]
pub struct NewService {
    pub name: String,
    pub namespace: String,
    pub pack_id: Uuid,
    pub pack_name: String,
    pub pack_version: String,
    pub replicas: i32,
    pub visibility: Visibility,
    pub exposed: bool,
    pub ingress_port: Option<u16>,
    pub scheduling: SchedulingConstraints,
    pub tolerations: Vec<Toleration>,
    pub resource_requests: PodResources,
    pub pod_labels: Labels,
    pub allowed_sources: Vec<String>,
    pub follow_latest: bool,
    pub created_by: Uuid,
}

/// Declarative fields a PATCH may change; None leaves the column alone.
#[derive(Debug, Clone, Default)]
pub struct ServicePatch {
    pub pack_id: Option<Uuid>,
    pub pack_version: Option<String>,
    pub replicas: Option<i32>,
    pub status: Option<ServiceStatus>,
    pub status_message: Option<Option<String>>,
    pub visibility: Option<Visibility>,
    pub exposed: Option<bool>,
    pub ingress_port: Option<Option<u16>>,
    pub scheduling: Option<SchedulingConstraints>,
    pub tolerations: Option<Vec<Toleration>>,
    pub resource_requests: Option<PodResources>,
    pub pod_labels: Option<Labels>,
    pub allowed_sources: Option<Vec<String>>,
    pub follow_latest: Option<bool>,
    pub failure_state: Option<FailureState>,
}

impl ServicePatch {
    /// True when applying this patch to `svc` would change nothing, which
    /// makes the PATCH a no-op end to end.
    pub fn is_noop_for(&self, svc: &Service) -> bool {
        self.pack_id.is_none_or(|v| v == svc.pack_id)
            && self
                .pack_version
                .as_ref()
                .is_none_or(|v| *v == svc.pack_version)
            && self.replicas.is_none_or(|v| v == svc.replicas)
            && self.status.is_none_or(|v| v == svc.status)
            && self
                .status_message
                .as_ref()
                .is_none_or(|v| *v == svc.status_message)
            && self.visibility.is_none_or(|v| v == svc.visibility)
            && self.exposed.is_none_or(|v| v == svc.exposed)
            && self.ingress_port.is_none_or(|v| v == svc.ingress_port)
            && self.scheduling.as_ref().is_none_or(|v| *v == svc.scheduling)
            && self
                .tolerations
                .as_ref()
                .is_none_or(|v| *v == svc.tolerations)
            && self
                .resource_requests
                .is_none_or(|v| v == svc.resource_requests)
            && self.pod_labels.as_ref().is_none_or(|v| *v == svc.pod_labels)
            && self
                .allowed_sources
                .as_ref()
                .is_none_or(|v| *v == svc.allowed_sources)
            && self.follow_latest.is_none_or(|v| v == svc.follow_latest)
            && self
                .failure_state
                .as_ref()
                .is_none_or(|v| *v == svc.failure_state)
    }
}

pub async fn create(store: &Store, corr: Uuid, new: NewService) -> StoreResult<Service> {
    let client = store.client().await?;
    let id = Uuid::new_v4();
    let now = Utc::now();
    let row = client
        .query_one(
            &format!(
                "INSERT INTO services (id, name, namespace, pack_id, pack_name, pack_version, \
                 replicas, status, status_message, visibility, exposed, ingress_port, \
                 scheduling, tolerations, resource_requests, pod_labels, allowed_sources, \
                 follow_latest, failure_state, created_by, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL, $9, $10, $11, $12, $13, $14, \
                 $15, $16, $17, $18, $19, $20, $21) RETURNING {COLUMNS}"
            ),
            &[
                &id,
                &new.name,
                &new.namespace,
                &new.pack_id,
                &new.pack_name,
                &new.pack_version,
                &new.replicas,
                &enum_str(&ServiceStatus::Pending),
                &enum_str(&new.visibility),
                &new.exposed,
                &new.ingress_port.map(|p| p as i32),
                &json(&new.scheduling),
                &json(&new.tolerations),
                &json(&new.resource_requests),
                &json(&new.pod_labels),
                &json(&new.allowed_sources),
                &new.follow_latest,
                &json(&FailureState::default()),
                &new.created_by,
                &now,
                &now,
            ],
        )
        .await
        .map_err(|e| StoreError::classify("insert service", e))?;
    let svc = row_to_service(&row)?;
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::Service,
        ChangeAction::Created,
        svc.id.to_string(),
        None,
        serde_json::to_value(&svc).ok(),
    ));
    Ok(svc)
}

pub async fn get_by_id(store: &Store, id: Uuid) -> StoreResult<Service> {
    let client = store.client().await?;
    let row = client
        .query_opt(
            &format!("SELECT {COLUMNS} FROM services WHERE id = $1"),
            &[&id],
        )
        .await
        .map_err(|e| StoreError::classify("query service", e))?
        .ok_or_else(|| StoreError::NotFound(format!("service {id}")))?;
    row_to_service(&row)
}

pub async fn get_by_name(store: &Store, namespace: &str, name: &str) -> StoreResult<Service> {
    let client = store.client().await?;
    let row = client
        .query_opt(
            &format!("SELECT {COLUMNS} FROM services WHERE namespace = $1 AND name = $2"),
            &[&namespace, &name],
        )
        .await
        .map_err(|e| StoreError::classify("query service", e))?
        .ok_or_else(|| StoreError::NotFound(format!("service {namespace}/{name}")))?;
    row_to_service(&row)
}

pub async fn list(store: &Store, offset: i64, limit: i64) -> StoreResult<Vec<Service>> {
    let client = store.client().await?;
    let rows = client
        .query(
            &format!(
                "SELECT {COLUMNS} FROM services ORDER BY namespace, name OFFSET $1 LIMIT $2"
            ),
            &[&offset, &limit],
        )
        .await
        .map_err(|e| StoreError::classify("list services", e))?;
    rows.iter().map(row_to_service).collect()
}

/// Every service; the reconciler and routing fabric snapshot through this.
pub async fn list_all(store: &Store) -> StoreResult<Vec<Service>> {
    list(store, 0, i64::MAX).await
}

pub async fn update(
    store: &Store,
    corr: Uuid,
    id: Uuid,
    patch: ServicePatch,
) -> StoreResult<Service> {
    let old = get_by_id(store, id).await?;
    let pack_id = patch.pack_id.unwrap_or(old.pack_id);
    let pack_version = patch
        .pack_version
        .clone()
        .unwrap_or_else(|| old.pack_version.clone());
    let replicas = patch.replicas.unwrap_or(old.replicas);
    let status = patch.status.unwrap_or(old.status);
    let status_message = match patch.status_message.clone() {
        Some(v) => v,
        None => old.status_message.clone(),
    };
    let visibility = patch.visibility.unwrap_or(old.visibility);
    let exposed = patch.exposed.unwrap_or(old.exposed);
    let ingress_port = match patch.ingress_port {
        Some(v) => v,
        None => old.ingress_port,
    };
    let scheduling = patch.scheduling.clone().unwrap_or_else(|| old.scheduling.clone());
    let tolerations = patch
        .tolerations
        .clone()
        .unwrap_or_else(|| old.tolerations.clone());
    let resource_requests = patch.resource_requests.unwrap_or(old.resource_requests);
    let pod_labels = patch.pod_labels.clone().unwrap_or_else(|| old.pod_labels.clone());
    let allowed_sources = patch
        .allowed_sources
        .clone()
        .unwrap_or_else(|| old.allowed_sources.clone());
    let follow_latest = patch.follow_latest.unwrap_or(old.follow_latest);
    let failure_state = patch
        .failure_state
        .clone()
        .unwrap_or_else(|| old.failure_state.clone());

    let client = store.client().await?;
    let row = client
        .query_opt(
            &format!(
                "UPDATE services SET pack_id = $2, pack_version = $3, replicas = $4, \
                 status = $5, status_message = $6, visibility = $7, exposed = $8, \
                 ingress_port = $9, scheduling = $10, tolerations = $11, \
                 resource_requests = $12, pod_labels = $13, allowed_sources = $14, \
                 follow_latest = $15, failure_state = $16, updated_at = $17 \
                 WHERE id = $1 RETURNING {COLUMNS}"
            ),
            &[
                &id,
                &pack_id,
                &pack_version,
                &replicas,
                &enum_str(&status),
                &status_message,
                &enum_str(&visibility),
                &exposed,
                &ingress_port.map(|p| p as i32),
                &json(&scheduling),
                &json(&tolerations),
                &json(&resource_requests),
                &json(&pod_labels),
                &json(&allowed_sources),
                &follow_latest,
                &json(&failure_state),
                &Utc::now(),
            ],
        )
        .await
        .map_err(|e| StoreError::classify("update service", e))?
        .ok_or_else(|| StoreError::NotFound(format!("service {id}")))?;
    let svc = row_to_service(&row)?;
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::Service,
        ChangeAction::Updated,
        svc.id.to_string(),
        serde_json::to_value(&old).ok(),
        serde_json::to_value(&svc).ok(),
    ));
    Ok(svc)
}

/// Status CAS used by the reconciler when entering/leaving `rolling`.
pub async fn transition(
    store: &Store,
    corr: Uuid,
    id: Uuid,
    from: ServiceStatus,
    to: ServiceStatus,
) -> StoreResult<Service> {
    let old = get_by_id(store, id).await?;
    let client = store.client().await?;
    let row = client
        .query_opt(
            &format!(
                "UPDATE services SET status = $3, updated_at = $4 \
                 WHERE id = $1 AND status = $2 RETURNING {COLUMNS}"
            ),
            &[&id, &enum_str(&from), &enum_str(&to), &Utc::now()],
        )
        .await
        .map_err(|e| StoreError::classify("transition service", e))?;
    let Some(row) = row else {
        return Err(StoreError::PreconditionFailed(format!(
            "service {id} is no longer {from}"
        )));
    };
    let svc = row_to_service(&row)?;
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::Service,
        ChangeAction::Updated,
        svc.id.to_string(),
        serde_json::to_value(&old).ok(),
        serde_json::to_value(&svc).ok(),
    ));
    Ok(svc)
}

pub async fn delete(store: &Store, corr: Uuid, id: Uuid) -> StoreResult<()> {
    let old = get_by_id(store, id).await?;
    let client = store.client().await?;
    let n = client
        .execute("DELETE FROM services WHERE id = $1", &[&id])
        .await
        .map_err(|e| StoreError::classify("delete service", e))?;
    if n == 0 {
        return Err(StoreError::NotFound(format!("service {id}")));
    }
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::Service,
        ChangeAction::Deleted,
        id.to_string(),
        serde_json::to_value(&old).ok(),
        None,
    ));
    Ok(())
}
