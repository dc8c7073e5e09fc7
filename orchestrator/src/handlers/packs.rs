use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use stark_common::types::{RuntimeTag, Visibility};
use stark_common::{Error, Pagination, error::ok};
use stark_store::packs::{self, NewPack};
use uuid::Uuid;

use crate::auth::Principal;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPackRequest {
    pub name: String,
    pub version: String,
    pub runtime_tag: RuntimeTag,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    pub bundle_path: String,
    #[serde(default)]
    pub min_node_version: Option<String>,
}

/// `POST /api/packs`. Re-registering an existing `(name, version)` is a
/// conflict; the first record wins.
pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<RegisterPackRequest>,
) -> Result<impl IntoResponse, Error> {
    if req.name.is_empty() {
        return Err(Error::Validation("pack name must not be empty".into()));
    }
    stark_common::parse_version(&req.version)?;
    if let Some(min) = &req.min_node_version {
        stark_common::parse_version(min)?;
    }
    let visibility = req.visibility.unwrap_or(Visibility::Private);
    if visibility == Visibility::System && !principal.is_admin() {
        return Err(Error::Policy("only admins may register system packs".into()));
    }
    let pack = packs::create(
        &state.store,
        Uuid::new_v4(),
        NewPack {
            name: req.name,
            version: req.version,
            runtime_tag: req.runtime_tag,
            owner_id: principal.id,
            visibility,
            bundle_path: req.bundle_path,
            min_node_version: req.min_node_version,
        },
    )
    .await?;
    Ok((axum::http::StatusCode::CREATED, ok(pack)))
}

/// `GET /api/packs`
pub async fn list(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<impl IntoResponse, Error> {
    let items = packs::list(&state.store, page.offset, page.effective_limit()).await?;
    Ok(ok(items))
}

/// `GET /api/packs/{name}/versions`
pub async fn versions(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let items = packs::list_versions(&state.store, &name).await?;
    if items.is_empty() {
        return Err(Error::NotFound(format!("pack {name}")));
    }
    Ok(ok(items))
}

/// `DELETE /api/packs/{id}`: owner or admin only.
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    let pack = packs::get_by_id(&state.store, id).await?;
    if pack.owner_id != principal.id && !principal.is_admin() {
        return Err(Error::Policy("not the pack owner".into()));
    }
    packs::delete(&state.store, Uuid::new_v4(), id).await?;
    Ok(ok(serde_json::json!({ "deleted": id })))
}
