use axum::{
    extract::Path,
    routing::{delete, get, post, put},
    Json,
};
use serde::Deserialize;

use crate::database::tenant_key::{TenantKey, UpdateTenantKeyData};
use crate::database::DbResult;
use crate::service::app_state::{create_state_router, StateRouter};
use crate::utils::HttpResult;

#[derive(Deserialize)]
struct InsertTenantKeyRequest {
    account_id: i64,
    name: Option<String>,
    preset_id: Option<i64>,
    #[serde(default)]
    apply_regex: bool,
}

#[derive(Deserialize)]
struct UpdateTenantKeyRequest {
    name: Option<Option<String>>,
    preset_id: Option<Option<i64>>,
    apply_regex: Option<bool>,
    is_enabled: Option<bool>,
}

async fn insert_one(
    Json(payload): Json<InsertTenantKeyRequest>,
) -> DbResult<HttpResult<TenantKey>> {
    let created = TenantKey::create(
        payload.account_id,
        payload.name.as_deref(),
        payload.preset_id,
        payload.apply_regex,
    )?;
    Ok(HttpResult::new(created))
}

async fn update_one(
    Path(id): Path<i64>,
    Json(payload): Json<UpdateTenantKeyRequest>,
) -> DbResult<HttpResult<TenantKey>> {
    let update_data = UpdateTenantKeyData {
        name: payload.name,
        preset_id: payload.preset_id,
        apply_regex: payload.apply_regex,
        is_enabled: payload.is_enabled,
    };
    let updated = TenantKey::update(id, &update_data)?;
    Ok(HttpResult::new(updated))
}

async fn delete_one(Path(id): Path<i64>) -> DbResult<HttpResult<()>> {
    TenantKey::delete(id)?;
    Ok(HttpResult::new(()))
}

async fn list() -> DbResult<HttpResult<Vec<TenantKey>>> {
    let result = TenantKey::list_all()?;
    Ok(HttpResult::new(result))
}

pub fn create_tenant_key_router() -> StateRouter {
    create_state_router().nest(
        "/tenant_key",
        create_state_router()
            .route("/", post(insert_one))
            .route("/{id}", put(update_one))
            .route("/{id}", delete(delete_one))
            .route("/list", get(list)),
    )
}
