use axum::{
    extract::Path,
    routing::{delete, get, post, put},
    Json,
};
use serde::Deserialize;

use crate::controller::BaseError;
use crate::database::preset::{Preset, PresetDetail, PresetItemPayload, UpdatePresetData};
use crate::database::DbResult;
use crate::service::app_state::{create_state_router, StateRouter};
use crate::utils::HttpResult;

#[derive(Deserialize)]
struct InsertPresetRequest {
    name: String,
    account_id: i64,
    #[serde(default)]
    sort_order: i32,
    #[serde(default)]
    items: Vec<PresetItemPayload>,
}

#[derive(Deserialize)]
struct UpdatePresetRequest {
    name: Option<String>,
    is_enabled: Option<bool>,
    sort_order: Option<i32>,
    // When present, replaces the preset's items wholesale.
    items: Option<Vec<PresetItemPayload>>,
}

async fn insert_one(
    Json(payload): Json<InsertPresetRequest>,
) -> DbResult<HttpResult<PresetDetail>> {
    let created = Preset::create(
        &payload.name,
        payload.account_id,
        payload.sort_order,
        &payload.items,
    )?;
    Ok(HttpResult::new(created))
}

async fn update_one(
    Path(id): Path<i64>,
    Json(payload): Json<UpdatePresetRequest>,
) -> DbResult<HttpResult<PresetDetail>> {
    let update_data = UpdatePresetData {
        name: payload.name,
        is_enabled: payload.is_enabled,
        sort_order: payload.sort_order,
    };
    let updated = Preset::update(id, &update_data, payload.items.as_deref())?;
    Ok(HttpResult::new(updated))
}

async fn delete_one(Path(id): Path<i64>) -> DbResult<HttpResult<()>> {
    Preset::delete(id)?;
    Ok(HttpResult::new(()))
}

async fn get_one(Path(id): Path<i64>) -> DbResult<HttpResult<PresetDetail>> {
    let detail = Preset::get_with_items(id)?
        .ok_or_else(|| BaseError::NotFound(Some(format!("Preset with id {} not found", id))))?;
    Ok(HttpResult::new(detail))
}

async fn list() -> DbResult<HttpResult<Vec<Preset>>> {
    let result = Preset::list_all()?;
    Ok(HttpResult::new(result))
}

pub fn create_preset_router() -> StateRouter {
    create_state_router().nest(
        "/preset",
        create_state_router()
            .route("/", post(insert_one))
            .route("/{id}", get(get_one))
            .route("/{id}", put(update_one))
            .route("/{id}", delete(delete_one))
            .route("/list", get(list)),
    )
}
