//! Pack records: immutable versioned bundles, read-mostly.

use chrono::Utc;
use stark_common::events::{ChangeAction, ChangeEvent, EntityKind};
use stark_common::types::{Pack, RuntimeTag, Visibility};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult, enum_str, parse_enum};
use crate::Store;

const COLUMNS: &str = "id, name, version, runtime_tag, owner_id, visibility, bundle_path, \
                       min_node_version, created_at";

fn row_to_pack(row: &Row) -> StoreResult<Pack> {
    Ok(Pack {
        id: row.get("id"),
        name: row.get("name"),
        version: row.get("version"),
        runtime_tag: parse_enum::<RuntimeTag>("runtime_tag", row.get("runtime_tag"))?,
        owner_id: row.get("owner_id"),
        visibility: parse_enum::<Visibility>("visibility", row.get("visibility"))?,
        bundle_path: row.get("bundle_path"),
        min_node_version: row.get("min_node_version"),
        created_at: row.get("created_at"),
    })
}

#[derive(Debug, Clone)]
pub struct NewPack {
    pub name: String,
    pub version: String,
    pub runtime_tag: RuntimeTag,
    pub owner_id: Uuid,
    pub visibility: Visibility,
    pub bundle_path: String,
    pub min_node_version: Option<String>,
}

/// Register a pack. `(name, version)` is unique; re-registering the same
/// pair is a conflict and the first record is unchanged.
pub async fn create(store: &Store, corr: Uuid, new: NewPack) -> StoreResult<Pack> {
    let client = store.client().await?;
    let id = Uuid::new_v4();
    let row = client
        .query_one(
            &format!(
                "INSERT INTO packs (id, name, version, runtime_tag, owner_id, visibility, \
                 bundle_path, min_node_version, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {COLUMNS}"
            ),
            &[
                &id,
                &new.name,
                &new.version,
                &enum_str(&new.runtime_tag),
                &new.owner_id,
                &enum_str(&new.visibility),
                &new.bundle_path,
                &new.min_node_version,
                &Utc::now(),
            ],
        )
        .await
        .map_err(|e| StoreError::classify("insert pack", e))?;
    let pack = row_to_pack(&row)?;
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::Pack,
        ChangeAction::Created,
        pack.id.to_string(),
        None,
        serde_json::to_value(&pack).ok(),
    ));
    Ok(pack)
}

pub async fn get_by_id(store: &Store, id: Uuid) -> StoreResult<Pack> {
    let client = store.client().await?;
    let row = client
        .query_opt(&format!("SELECT {COLUMNS} FROM packs WHERE id = $1"), &[&id])
        .await
        .map_err(|e| StoreError::classify("query pack", e))?
        .ok_or_else(|| StoreError::NotFound(format!("pack {id}")))?;
    row_to_pack(&row)
}

pub async fn get_by_name_version(store: &Store, name: &str, version: &str) -> StoreResult<Pack> {
    let client = store.client().await?;
    let row = client
        .query_opt(
            &format!("SELECT {COLUMNS} FROM packs WHERE name = $1 AND version = $2"),
            &[&name, &version],
        )
        .await
        .map_err(|e| StoreError::classify("query pack", e))?
        .ok_or_else(|| StoreError::NotFound(format!("pack {name}@{version}")))?;
    row_to_pack(&row)
}

pub async fn list(store: &Store, offset: i64, limit: i64) -> StoreResult<Vec<Pack>> {
    let client = store.client().await?;
    let rows = client
        .query(
            &format!(
                "SELECT {COLUMNS} FROM packs ORDER BY name, created_at OFFSET $1 LIMIT $2"
            ),
            &[&offset, &limit],
        )
        .await
        .map_err(|e| StoreError::classify("list packs", e))?;
    rows.iter().map(row_to_pack).collect()
}

/// All registered versions of one pack name, newest registration first.
pub async fn list_versions(store: &Store, name: &str) -> StoreResult<Vec<Pack>> {
    let client = store.client().await?;
    let rows = client
        .query(
            &format!("SELECT {COLUMNS} FROM packs WHERE name = $1 ORDER BY created_at DESC"),
            &[&name],
        )
        .await
        .map_err(|e| StoreError::classify("list pack versions", e))?;
    rows.iter().map(row_to_pack).collect()
}

/// The highest registered semver for `name`, if any.
pub async fn latest(store: &Store, name: &str) -> StoreResult<Option<Pack>> {
    let versions = list_versions(store, name).await?;
    let Some(max) = stark_common::latest_version(versions.iter().map(|p| p.version.as_str()))
    else {
        return Ok(None);
    };
    Ok(versions.into_iter().find(|p| p.version == max.to_string()))
}

pub async fn delete(store: &Store, corr: Uuid, id: Uuid) -> StoreResult<()> {
    let pack = get_by_id(store, id).await?;
    let client = store.client().await?;
    let n = client
        .execute("DELETE FROM packs WHERE id = $1", &[&id])
        .await
        .map_err(|e| StoreError::classify("delete pack", e))?;
    if n == 0 {
        return Err(StoreError::NotFound(format!("pack {id}")));
    }
    store.bus.publish(ChangeEvent::new(
        corr,
        EntityKind::Pack,
        ChangeAction::Deleted,
        id.to_string(),
        serde_json::to_value(&pack).ok(),
        None,
    ));
    Ok(())
}
