//! Pod records and their transition history.
//!
//! Status changes go through [`transition`], which enforces the pod state
//! machine's edge set, appends a history row, and emits the change event in
//! one place.

use chrono::{DateTime, Utc};
use stark_common::events::{ChangeAction, ChangeEvent, EntityKind};
use stark_common::types::{
    Labels, Pod, PodEvent, PodResources, PodStatus, SchedulingConstraints, Toleration,
};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult, enum_str, from_json, parse_enum};
use crate::Store;

const COLUMNS: &str = "id, pack_id, pack_version, node_id, namespace, status, status_message, \
                       priority, labels, tolerations, scheduling, resource_requests, \
                       resource_limits, created_by, service_id, created_at, started_at, \
                       stopped_at";

fn row_to_pod(row: &Row) -> StoreResult<Pod> {
    let resource_limits: Option<serde_json::Value> = row.get("resource_limits");
    Ok(Pod {
        id: row.get("id"),
        pack_id: row.get("pack_id"),
        pack_version: row.get("pack_version"),
        node_id: row.get("node_id"),
        namespace: row.get("namespace"),
        status: parse_enum::<PodStatus>("status", row.get("status"))?,
        status_message: row.get("status_message"),
        priority: row.get("priority"),
        labels: from_json::<Labels>("labels", row.get("labels"))?,
        tolerations: from_json::<Vec<Toleration>>("tolerations", row.get("tolerations"))?,
        scheduling: from_json::<SchedulingConstraints>("scheduling", row.get("scheduling"))?,
        resource_requests: from_json::<PodResources>(
            "resource_requests",
            row.get("resource_requests"),
        )?,
        resource_limits: resource_limits
            .map(|v| from_json::<PodResources>("resource_limits", v))
            .transpose()?,
        created_by: row.get("created_by"),
        service_id: row.get("service_id"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        stopped_at: row.get("stopped_at"),
    })
}

fn json<T: serde::Serialize>(v: &T) -> serde_json::Value {
    serde_json::to_value(v).expect("entity field serializes")
}

#[derive(Debug, Clone)]
pub struct NewPod {
    pub pack_id: Uuid,
    pub pack_version: String,
    pub namespace: String,
    pub priority: i32,
    pub labels: Labels,
    pub tolerations: Vec<Toleration>,
    pub scheduling: SchedulingConstraints,
    pub resource_requests: PodResources,
    pub resource_limits: Option<PodResources>,
    pub created_by: Uuid,
    pub service_id: Option<Uuid>,
}

/// Non-status fields a patch may touch.
#[derive(Debug, Clone, Default)]
pub struct PodPatch {
    pub status_message: Option<String>,
    pub tolerations: Option<Vec<Toleration>>,
    pub labels: Option<Labels>,
}

/// Fields written together with a status transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionPatch {
    pub node_id: Option<Option<Uuid>>,
    pub status_message: Option<Option<String>>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Filters for [`list`]; all optional and ANDed together.
#[derive(Debug, Clone, Default)]
pub struct PodFilter {
    pub namespace: Option<String>,
    pub service_id: Option<Uuid>,
    pub node_id: Option<Uuid>,
    pub statuses: Option<Vec<PodStatus>>,
}

pub async fn create(store: &Store, corr: Uuid, new: NewPod) -> StoreResult<Pod> {
    let client = store.client().await?;
    let id = Uuid::new_v4();
    let now = Utc::now();
    let row = client
        .query_one(
            &format!(
                "INSERT INTO pods (id, pack_id, pack_version, node_id, namespace, status, \
                 priority, labels, tolerations, scheduling, resource_requests, resource_limits, \
                 created_by, service_id, created_at) \
                 VALUES ($1, $2, $3, NULL, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
                 RETURNING {COLUMNS}"
            ),
            &[
                &id,
                &new.pack_id,
                &new.pack_version,
                &new.namespace,
                &enum_str(&PodStatus::Pending),
                &new.priority,
                &json(&new.labels),
                &json(&new.tolerations),
                &json(&new.scheduling),
                &json(&new.resource_requests),
                &new.resource_limits.as_ref().map(json),
                &new.created_by,
                &new.service_id,
                &now,
            ],
        )
        .await
        .map_err(|e| StoreError::classify("insert pod", e))?;
    client
        .execute(
            "INSERT INTO pod_events (pod_id, from_status, to_status, message, at) \
             VALUES ($1, NULL, $2, NULL, $3)",
            &[&id, &enum_str(&PodStatus::Pending), &now],
        )
        .await
        .map_err(|e| StoreError::classify("insert pod event", e))?;
    let pod = row_to_pod(&row)?;
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::Pod,
        ChangeAction::Created,
        pod.id.to_string(),
        None,
        serde_json::to_value(&pod).ok(),
    ));
    Ok(pod)
}

pub async fn get_by_id(store: &Store, id: Uuid) -> StoreResult<Pod> {
    let client = store.client().await?;
    let row = client
        .query_opt(&format!("SELECT {COLUMNS} FROM pods WHERE id = $1"), &[&id])
        .await
        .map_err(|e| StoreError::classify("query pod", e))?
        .ok_or_else(|| StoreError::NotFound(format!("pod {id}")))?;
    row_to_pod(&row)
}

pub async fn list(store: &Store, filter: &PodFilter, offset: i64, limit: i64) -> StoreResult<Vec<Pod>> {
    let client = store.client().await?;
    let statuses: Option<Vec<String>> = filter
        .statuses
        .as_ref()
        .map(|s| s.iter().map(enum_str).collect());
    let rows = client
        .query(
            &format!(
                "SELECT {COLUMNS} FROM pods \
                 WHERE ($1::TEXT IS NULL OR namespace = $1) \
                   AND ($2::UUID IS NULL OR service_id = $2) \
                   AND ($3::UUID IS NULL OR node_id = $3) \
                   AND ($4::TEXT[] IS NULL OR status = ANY($4)) \
                 ORDER BY created_at, id OFFSET $5 LIMIT $6"
            ),
            &[
                &filter.namespace,
                &filter.service_id,
                &filter.node_id,
                &statuses,
                &offset,
                &limit,
            ],
        )
        .await
        .map_err(|e| StoreError::classify("list pods", e))?;
    rows.iter().map(row_to_pod).collect()
}

/// Unbounded variant for reconcile passes that must see every match.
pub async fn list_all(store: &Store, filter: &PodFilter) -> StoreResult<Vec<Pod>> {
    list(store, filter, 0, i64::MAX).await
}

pub async fn update(store: &Store, corr: Uuid, id: Uuid, patch: PodPatch) -> StoreResult<Pod> {
    let old = get_by_id(store, id).await?;
    let status_message = patch
        .status_message
        .clone()
        .or_else(|| old.status_message.clone());
    let tolerations = patch
        .tolerations
        .clone()
        .unwrap_or_else(|| old.tolerations.clone());
    let labels = patch.labels.clone().unwrap_or_else(|| old.labels.clone());
    let client = store.client().await?;
    let row = client
        .query_opt(
            &format!(
                "UPDATE pods SET status_message = $2, tolerations = $3, labels = $4 \
                 WHERE id = $1 RETURNING {COLUMNS}"
            ),
            &[&id, &status_message, &json(&tolerations), &json(&labels)],
        )
        .await
        .map_err(|e| StoreError::classify("update pod", e))?
        .ok_or_else(|| StoreError::NotFound(format!("pod {id}")))?;
    let pod = row_to_pod(&row)?;
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::Pod,
        ChangeAction::Updated,
        pod.id.to_string(),
        serde_json::to_value(&old).ok(),
        serde_json::to_value(&pod).ok(),
    ));
    Ok(pod)
}

/// Compare-and-swap status transition. Fails `PreconditionFailed` when the
/// row no longer holds `from`, and `Invalid` when `(from, to)` is not an
/// edge of the pod state machine.
pub async fn transition(
    store: &Store,
    corr: Uuid,
    id: Uuid,
    from: PodStatus,
    to: PodStatus,
    patch: TransitionPatch,
) -> StoreResult<Pod> {
    if !from.can_transition_to(to) {
        return Err(StoreError::Invalid(format!(
            "pod transition {from} -> {to} is not allowed"
        )));
    }
    let old = get_by_id(store, id).await?;
    let node_id = match patch.node_id {
        Some(v) => v,
        None => old.node_id,
    };
    let status_message = match patch.status_message.clone() {
        Some(v) => v,
        None => old.status_message.clone(),
    };
    let started_at = patch.started_at.or(old.started_at);
    let stopped_at = patch.stopped_at.or(old.stopped_at);

    let client = store.client().await?;
    let now = Utc::now();
    let row = client
        .query_opt(
            &format!(
                "UPDATE pods SET status = $3, node_id = $4, status_message = $5, \
                 started_at = $6, stopped_at = $7 \
                 WHERE id = $1 AND status = $2 RETURNING {COLUMNS}"
            ),
            &[
                &id,
                &enum_str(&from),
                &enum_str(&to),
                &node_id,
                &status_message,
                &started_at,
                &stopped_at,
            ],
        )
        .await
        .map_err(|e| StoreError::classify("transition pod", e))?;
    let Some(row) = row else {
        return Err(StoreError::PreconditionFailed(format!(
            "pod {id} is no longer {from}"
        )));
    };
    client
        .execute(
            "INSERT INTO pod_events (pod_id, from_status, to_status, message, at) \
             VALUES ($1, $2, $3, $4, $5)",
            &[
                &id,
                &enum_str(&from),
                &enum_str(&to),
                &status_message,
                &now,
            ],
        )
        .await
        .map_err(|e| StoreError::classify("insert pod event", e))?;
    let pod = row_to_pod(&row)?;
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::Pod,
        ChangeAction::Updated,
        pod.id.to_string(),
        serde_json::to_value(&old).ok(),
        serde_json::to_value(&pod).ok(),
    ));
    Ok(pod)
}

pub async fn history(store: &Store, pod_id: Uuid) -> StoreResult<Vec<PodEvent>> {
    let client = store.client().await?;
    let rows = client
        .query(
            "SELECT id, pod_id, from_status, to_status, message, at \
             FROM pod_events WHERE pod_id = $1 ORDER BY id",
            &[&pod_id],
        )
        .await
        .map_err(|e| StoreError::classify("query pod history", e))?;
    rows.iter()
        .map(|row| {
            let from: Option<String> = row.get("from_status");
            Ok(PodEvent {
                id: row.get("id"),
                pod_id: row.get("pod_id"),
                from_status: from
                    .map(|s| parse_enum::<PodStatus>("from_status", &s))
                    .transpose()?,
                to_status: parse_enum::<PodStatus>("to_status", row.get("to_status"))?,
                message: row.get("message"),
                at: row.get("at"),
            })
        })
        .collect()
}

/// Aggregate non-terminal usage for a namespace, for quota admission.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceUsage {
    pub pods: i64,
    pub cpu: i64,
    pub memory: i64,
    pub storage: i64,
}

pub async fn namespace_usage(store: &Store, namespace: &str) -> StoreResult<NamespaceUsage> {
    let filter = PodFilter {
        namespace: Some(namespace.to_string()),
        ..Default::default()
    };
    let pods = list_all(store, &filter).await?;
    let mut usage = NamespaceUsage::default();
    for pod in pods.iter().filter(|p| !p.status.is_terminal()) {
        usage.pods += 1;
        usage.cpu += pod.resource_requests.cpu;
        usage.memory += pod.resource_requests.memory;
        usage.storage += pod.resource_requests.storage_or_zero();
    }
    Ok(usage)
}

pub async fn delete(store: &Store, corr: Uuid, id: Uuid) -> StoreResult<()> {
    let old = get_by_id(store, id).await?;
    let client = store.client().await?;
    client
        .execute("DELETE FROM pods WHERE id = $1", &[&id])
        .await
        .map_err(|e| StoreError::classify("delete pod", e))?;
    client
        .execute("DELETE FROM pod_events WHERE pod_id = $1", &[&id])
        .await
        .map_err(|e| StoreError::classify("delete pod events", e))?;
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::Pod,
        ChangeAction::Deleted,
        id.to_string(),
        serde_json::to_value(&old).ok(),
        None,
    ));
    Ok(())
}
