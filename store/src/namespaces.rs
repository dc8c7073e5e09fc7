//! Namespace records: isolation scopes with quotas and default limits.

use chrono::Utc;
use stark_common::events::{ChangeAction, ChangeEvent, EntityKind};
use stark_common::types::{Labels, LimitRange, Namespace, NamespacePhase, ResourceQuota};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult, enum_str, from_json, parse_enum};
use crate::Store;

const COLUMNS: &str = "name, phase, labels, resource_quota, limit_range, created_by, created_at";

fn row_to_namespace(row: &Row) -> StoreResult<Namespace> {
    let quota: Option<serde_json::Value> = row.get("resource_quota");
    let limit_range: Option<serde_json::Value> = row.get("limit_range");
    Ok(Namespace {
        name: row.get("name"),
        phase: parse_enum::<NamespacePhase>("phase", row.get("phase"))?,
        labels: from_json::<Labels>("labels", row.get("labels"))?,
        resource_quota: quota
            .map(|v| from_json::<ResourceQuota>("resource_quota", v))
            .transpose()?,
        limit_range: limit_range
            .map(|v| from_json::<LimitRange>("limit_range", v))
            .transpose()?,
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
    })
}

fn json<T: serde::Serialize>(v: &T) -> serde_json::Value {
    serde_json::to_value(v).expect("entity field serializes")
}

#[derive(Debug, Clone)]
pub struct NewNamespace {
    pub name: String,
    pub labels: Labels,
    pub resource_quota: Option<ResourceQuota>,
    pub limit_range: Option<LimitRange>,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct NamespacePatch {
    pub phase: Option<NamespacePhase>,
    pub labels: Option<Labels>,
    pub resource_quota: Option<Option<ResourceQuota>>,
    pub limit_range: Option<Option<LimitRange>>,
}

pub async fn create(store: &Store, corr: Uuid, new: NewNamespace) -> StoreResult<Namespace> {
    let client = store.client().await?;
    let row = client
        .query_one(
            &format!(
                "INSERT INTO namespaces (name, phase, labels, resource_quota, limit_range, \
                 created_by, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {COLUMNS}"
            ),
            &[
                &new.name,
                &enum_str(&NamespacePhase::Active),
                &json(&new.labels),
                &new.resource_quota.as_ref().map(json),
                &new.limit_range.as_ref().map(json),
                &new.created_by,
                &Utc::now(),
            ],
        )
        .await
        .map_err(|e| StoreError::classify("insert namespace", e))?;
    let ns = row_to_namespace(&row)?;
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::Namespace,
        ChangeAction::Created,
        ns.name.clone(),
        None,
        serde_json::to_value(&ns).ok(),
    ));
    Ok(ns)
}

pub async fn get(store: &Store, name: &str) -> StoreResult<Namespace> {
    let client = store.client().await?;
    let row = client
        .query_opt(
            &format!("SELECT {COLUMNS} FROM namespaces WHERE name = $1"),
            &[&name],
        )
        .await
        .map_err(|e| StoreError::classify("query namespace", e))?
        .ok_or_else(|| StoreError::NotFound(format!("namespace {name}")))?;
    row_to_namespace(&row)
}

pub async fn list(store: &Store, offset: i64, limit: i64) -> StoreResult<Vec<Namespace>> {
    let client = store.client().await?;
    let rows = client
        .query(
            &format!("SELECT {COLUMNS} FROM namespaces ORDER BY name OFFSET $1 LIMIT $2"),
            &[&offset, &limit],
        )
        .await
        .map_err(|e| StoreError::classify("list namespaces", e))?;
    rows.iter().map(row_to_namespace).collect()
}

pub async fn update(
    store: &Store,
    corr: Uuid,
    name: &str,
    patch: NamespacePatch,
) -> StoreResult<Namespace> {
    let old = get(store, name).await?;
    let phase = patch.phase.unwrap_or(old.phase);
    let labels = patch.labels.clone().unwrap_or_else(|| old.labels.clone());
    let resource_quota = match patch.resource_quota {
        Some(v) => v,
        None => old.resource_quota,
    };
    let limit_range = match patch.limit_range {
        Some(v) => v,
        None => old.limit_range,
    };
    let client = store.client().await?;
    let row = client
        .query_opt(
            &format!(
                "UPDATE namespaces SET phase = $2, labels = $3, resource_quota = $4, \
                 limit_range = $5 WHERE name = $1 RETURNING {COLUMNS}"
            ),
            &[
                &name,
                &enum_str(&phase),
                &json(&labels),
                &resource_quota.as_ref().map(json),
                &limit_range.as_ref().map(json),
            ],
        )
        .await
        .map_err(|e| StoreError::classify("update namespace", e))?
        .ok_or_else(|| StoreError::NotFound(format!("namespace {name}")))?;
    let ns = row_to_namespace(&row)?;
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::Namespace,
        ChangeAction::Updated,
        ns.name.clone(),
        serde_json::to_value(&old).ok(),
        serde_json::to_value(&ns).ok(),
    ));
    Ok(ns)
}

/// Remove the row outright. Callers mark the namespace Terminating first
/// and only call this once every pod in it has stopped.
pub async fn remove(store: &Store, corr: Uuid, name: &str) -> StoreResult<()> {
    let old = get(store, name).await?;
    let client = store.client().await?;
    let n = client
        .execute("DELETE FROM namespaces WHERE name = $1", &[&name])
        .await
        .map_err(|e| StoreError::classify("delete namespace", e))?;
    if n == 0 {
        return Err(StoreError::NotFound(format!("namespace {name}")));
    }
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::Namespace,
        ChangeAction::Deleted,
        name.to_string(),
        serde_json::to_value(&old).ok(),
        None,
    ));
    Ok(())
}
