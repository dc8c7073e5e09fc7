//! Network policy records. One row per ordered (source, target, namespace)
//! triple; the unique constraint enforces it.

use chrono::Utc;
use stark_common::events::{ChangeAction, ChangeEvent, EntityKind};
use stark_common::types::{NetworkPolicy, PolicyAction};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult, enum_str, parse_enum};
use crate::Store;

const COLUMNS: &str = "id, source_service, target_service, action, namespace, created_at";

fn row_to_policy(row: &Row) -> StoreResult<NetworkPolicy> {
    Ok(NetworkPolicy {
        id: row.get("id"),
        source_service: row.get("source_service"),
        target_service: row.get("target_service"),
        action: parse_enum::<PolicyAction>("action", row.get("action"))?,
        namespace: row.get("namespace"),
        created_at: row.get("created_at"),
    })
}

#[derive(Debug, Clone)]
pub struct NewPolicy {
    pub source_service: String,
    pub target_service: String,
    pub action: PolicyAction,
    pub namespace: String,
}

pub async fn create(store: &Store, corr: Uuid, new: NewPolicy) -> StoreResult<NetworkPolicy> {
    let client = store.client().await?;
    let row = client
        .query_one(
            &format!(
                "INSERT INTO network_policies (id, source_service, target_service, action, \
                 namespace, created_at) VALUES ($1, $2, $3, $4, $5, $6) RETURNING {COLUMNS}"
            ),
            &[
                &Uuid::new_v4(),
                &new.source_service,
                &new.target_service,
                &enum_str(&new.action),
                &new.namespace,
                &Utc::now(),
            ],
        )
        .await
        .map_err(|e| StoreError::classify("insert network policy", e))?;
    let policy = row_to_policy(&row)?;
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::NetworkPolicy,
        ChangeAction::Created,
        policy.id.to_string(),
        None,
        serde_json::to_value(&policy).ok(),
    ));
    Ok(policy)
}

pub async fn get_by_id(store: &Store, id: Uuid) -> StoreResult<NetworkPolicy> {
    let client = store.client().await?;
    let row = client
        .query_opt(
            &format!("SELECT {COLUMNS} FROM network_policies WHERE id = $1"),
            &[&id],
        )
        .await
        .map_err(|e| StoreError::classify("query network policy", e))?
        .ok_or_else(|| StoreError::NotFound(format!("network policy {id}")))?;
    row_to_policy(&row)
}

pub async fn list(store: &Store, namespace: Option<&str>) -> StoreResult<Vec<NetworkPolicy>> {
    let client = store.client().await?;
    let rows = client
        .query(
            &format!(
                "SELECT {COLUMNS} FROM network_policies \
                 WHERE ($1::TEXT IS NULL OR namespace = $1) \
                 ORDER BY namespace, source_service, target_service"
            ),
            &[&namespace],
        )
        .await
        .map_err(|e| StoreError::classify("list network policies", e))?;
    rows.iter().map(row_to_policy).collect()
}

pub async fn delete(store: &Store, corr: Uuid, id: Uuid) -> StoreResult<()> {
    let old = get_by_id(store, id).await?;
    let client = store.client().await?;
    let n = client
        .execute("DELETE FROM network_policies WHERE id = $1", &[&id])
        .await
        .map_err(|e| StoreError::classify("delete network policy", e))?;
    if n == 0 {
        return Err(StoreError::NotFound(format!("network policy {id}")));
    }
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::NetworkPolicy,
        ChangeAction::Deleted,
        id.to_string(),
        serde_json::to_value(&old).ok(),
        None,
    ));
    Ok(())
}
