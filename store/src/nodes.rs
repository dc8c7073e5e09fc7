//! Node records. The registry owns the lifecycle; this module is the typed
//! persistence underneath it.

use chrono::{DateTime, Utc};
use stark_common::events::{ChangeAction, ChangeEvent, EntityKind};
use stark_common::types::{Labels, Node, NodeResources, NodeStatus, RuntimeType, Taint};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult, enum_str, from_json, parse_enum};
use crate::Store;

const COLUMNS: &str = "id, name, runtime_type, runtime_version, status, unschedulable, labels, \
                       taints, allocatable, allocated, last_heartbeat, registered_by, \
                       connection_id, created_at, deleted_at";

fn row_to_node(row: &Row) -> StoreResult<Node> {
    Ok(Node {
        id: row.get("id"),
        name: row.get("name"),
        runtime_type: parse_enum::<RuntimeType>("runtime_type", row.get("runtime_type"))?,
        runtime_version: row.get("runtime_version"),
        status: parse_enum::<NodeStatus>("status", row.get("status"))?,
        unschedulable: row.get("unschedulable"),
        labels: from_json::<Labels>("labels", row.get("labels"))?,
        taints: from_json::<Vec<Taint>>("taints", row.get("taints"))?,
        allocatable: from_json::<NodeResources>("allocatable", row.get("allocatable"))?,
        allocated: from_json::<NodeResources>("allocated", row.get("allocated"))?,
        last_heartbeat: row.get("last_heartbeat"),
        registered_by: row.get("registered_by"),
        connection_id: row.get("connection_id"),
        created_at: row.get("created_at"),
        deleted_at: row.get("deleted_at"),
    })
}

fn json<T: serde::Serialize>(v: &T) -> serde_json::Value {
    serde_json::to_value(v).expect("entity field serializes")
}

#[derive(Debug, Clone)]
pub struct NewNode {
    pub name: String,
    pub runtime_type: RuntimeType,
    pub runtime_version: Option<String>,
    pub allocatable: NodeResources,
    pub labels: Labels,
    pub taints: Vec<Taint>,
    pub registered_by: Uuid,
    /// Absent for nodes pre-registered through the control API.
    pub connection_id: Option<Uuid>,
}

/// Fields an update may touch. None leaves the column alone.
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub status: Option<NodeStatus>,
    pub unschedulable: Option<bool>,
    pub labels: Option<Labels>,
    pub taints: Option<Vec<Taint>>,
    pub allocatable: Option<NodeResources>,
    pub allocated: Option<NodeResources>,
    pub runtime_version: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub connection_id: Option<Option<Uuid>>,
}

pub async fn create(store: &Store, corr: Uuid, new: NewNode) -> StoreResult<Node> {
    let client = store.client().await?;
    let id = Uuid::new_v4();
    let now = Utc::now();
    let row = client
        .query_one(
            &format!(
                "INSERT INTO nodes (id, name, runtime_type, runtime_version, status, \
                 unschedulable, labels, taints, allocatable, allocated, last_heartbeat, \
                 registered_by, connection_id, created_at) \
                 VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7, $8, $9, $10, $11, $12, $13) \
                 RETURNING {COLUMNS}"
            ),
            &[
                &id,
                &new.name,
                &enum_str(&new.runtime_type),
                &new.runtime_version,
                &enum_str(&NodeStatus::Online),
                &json(&new.labels),
                &json(&new.taints),
                &json(&new.allocatable),
                &json(&NodeResources::default()),
                &now,
                &new.registered_by,
                &new.connection_id,
                &now,
            ],
        )
        .await
        .map_err(|e| StoreError::classify("insert node", e))?;
    let node = row_to_node(&row)?;
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::Node,
        ChangeAction::Created,
        node.id.to_string(),
        None,
        serde_json::to_value(&node).ok(),
    ));
    Ok(node)
}

pub async fn get_by_id(store: &Store, id: Uuid) -> StoreResult<Node> {
    let client = store.client().await?;
    let row = client
        .query_opt(
            &format!("SELECT {COLUMNS} FROM nodes WHERE id = $1 AND deleted_at IS NULL"),
            &[&id],
        )
        .await
        .map_err(|e| StoreError::classify("query node", e))?
        .ok_or_else(|| StoreError::NotFound(format!("node {id}")))?;
    row_to_node(&row)
}

pub async fn get_by_name(store: &Store, name: &str) -> StoreResult<Node> {
    let client = store.client().await?;
    let row = client
        .query_opt(
            &format!("SELECT {COLUMNS} FROM nodes WHERE name = $1 AND deleted_at IS NULL"),
            &[&name],
        )
        .await
        .map_err(|e| StoreError::classify("query node", e))?
        .ok_or_else(|| StoreError::NotFound(format!("node {name}")))?;
    row_to_node(&row)
}

pub async fn list(store: &Store, offset: i64, limit: i64) -> StoreResult<Vec<Node>> {
    let client = store.client().await?;
    let rows = client
        .query(
            &format!(
                "SELECT {COLUMNS} FROM nodes WHERE deleted_at IS NULL \
                 ORDER BY name OFFSET $1 LIMIT $2"
            ),
            &[&offset, &limit],
        )
        .await
        .map_err(|e| StoreError::classify("list nodes", e))?;
    rows.iter().map(row_to_node).collect()
}

/// Every live node; the scheduler snapshots through this.
pub async fn list_all(store: &Store) -> StoreResult<Vec<Node>> {
    let client = store.client().await?;
    let rows = client
        .query(
            &format!("SELECT {COLUMNS} FROM nodes WHERE deleted_at IS NULL ORDER BY id"),
            &[],
        )
        .await
        .map_err(|e| StoreError::classify("list nodes", e))?;
    rows.iter().map(row_to_node).collect()
}

pub async fn update(store: &Store, corr: Uuid, id: Uuid, patch: NodePatch) -> StoreResult<Node> {
    let old = get_by_id(store, id).await?;
    let status = patch.status.unwrap_or(old.status);
    let unschedulable = patch.unschedulable.unwrap_or(old.unschedulable);
    let labels = patch.labels.unwrap_or_else(|| old.labels.clone());
    let taints = patch.taints.unwrap_or_else(|| old.taints.clone());
    let allocatable = patch.allocatable.unwrap_or(old.allocatable);
    let allocated = patch.allocated.unwrap_or(old.allocated);
    let runtime_version = patch
        .runtime_version
        .clone()
        .or_else(|| old.runtime_version.clone());
    let last_heartbeat = patch.last_heartbeat.or(old.last_heartbeat);
    let connection_id = match patch.connection_id {
        Some(v) => v,
        None => old.connection_id,
    };

    let client = store.client().await?;
    let row = client
        .query_opt(
            &format!(
                "UPDATE nodes SET status = $2, unschedulable = $3, labels = $4, taints = $5, \
                 allocatable = $6, allocated = $7, runtime_version = $8, last_heartbeat = $9, \
                 connection_id = $10 \
                 WHERE id = $1 AND deleted_at IS NULL RETURNING {COLUMNS}"
            ),
            &[
                &id,
                &enum_str(&status),
                &unschedulable,
                &json(&labels),
                &json(&taints),
                &json(&allocatable),
                &json(&allocated),
                &runtime_version,
                &last_heartbeat,
                &connection_id,
            ],
        )
        .await
        .map_err(|e| StoreError::classify("update node", e))?
        .ok_or_else(|| StoreError::NotFound(format!("node {id}")))?;
    let node = row_to_node(&row)?;
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::Node,
        ChangeAction::Updated,
        node.id.to_string(),
        serde_json::to_value(&old).ok(),
        serde_json::to_value(&node).ok(),
    ));
    Ok(node)
}

/// Lifecycle CAS: only applies when the row still holds `from`.
pub async fn transition(
    store: &Store,
    corr: Uuid,
    id: Uuid,
    from: NodeStatus,
    to: NodeStatus,
) -> StoreResult<Node> {
    let old = get_by_id(store, id).await?;
    let client = store.client().await?;
    let row = client
        .query_opt(
            &format!(
                "UPDATE nodes SET status = $3 \
                 WHERE id = $1 AND status = $2 AND deleted_at IS NULL RETURNING {COLUMNS}"
            ),
            &[&id, &enum_str(&from), &enum_str(&to)],
        )
        .await
        .map_err(|e| StoreError::classify("transition node", e))?;
    let Some(row) = row else {
        return Err(StoreError::PreconditionFailed(format!(
            "node {id} is no longer {}",
            enum_str(&from)
        )));
    };
    let node = row_to_node(&row)?;
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::Node,
        ChangeAction::Updated,
        node.id.to_string(),
        serde_json::to_value(&old).ok(),
        serde_json::to_value(&node).ok(),
    ));
    Ok(node)
}

/// Soft delete. Name uniqueness only spans live rows, so the name can be
/// re-registered immediately.
pub async fn delete(store: &Store, corr: Uuid, id: Uuid) -> StoreResult<Node> {
    let old = get_by_id(store, id).await?;
    let client = store.client().await?;
    let row = client
        .query_opt(
            &format!(
                "UPDATE nodes SET deleted_at = $2, status = $3, connection_id = NULL \
                 WHERE id = $1 AND deleted_at IS NULL RETURNING {COLUMNS}"
            ),
            &[&id, &Utc::now(), &enum_str(&NodeStatus::Offline)],
        )
        .await
        .map_err(|e| StoreError::classify("delete node", e))?
        .ok_or_else(|| StoreError::NotFound(format!("node {id}")))?;
    let node = row_to_node(&row)?;
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::Node,
        ChangeAction::Deleted,
        node.id.to_string(),
        serde_json::to_value(&old).ok(),
        serde_json::to_value(&node).ok(),
    ));
    Ok(node)
}
