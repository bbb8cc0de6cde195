use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{delete, get, post, put},
    Json,
};
use serde::Deserialize;

use crate::database::credential::{UpdateUpstreamCredentialData, UpstreamCredential};
use crate::database::DbResult;
use crate::service::app_state::{create_state_router, AppState, StateRouter};
use crate::utils::HttpResult;

#[derive(Deserialize)]
struct InsertCredentialRequest {
    secret: String,
}

#[derive(Deserialize)]
struct UpdateCredentialRequest {
    secret: Option<String>,
    is_enabled: Option<bool>,
}

async fn insert_one(
    Json(payload): Json<InsertCredentialRequest>,
) -> DbResult<HttpResult<UpstreamCredential>> {
    let created = UpstreamCredential::create(&payload.secret)?;
    Ok(HttpResult::new(created))
}

async fn update_one(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateCredentialRequest>,
) -> DbResult<HttpResult<UpstreamCredential>> {
    let update_data = UpdateUpstreamCredentialData {
        secret: payload.secret,
        is_enabled: payload.is_enabled,
    };
    let updated = UpstreamCredential::update(id, &update_data)?;

    // A manual re-enable also lifts the pool's volatile auto-disable mark.
    if payload.is_enabled == Some(true) {
        app_state.pool.reinstate(id);
    }

    Ok(HttpResult::new(updated))
}

async fn delete_one(Path(id): Path<i64>) -> DbResult<HttpResult<()>> {
    UpstreamCredential::delete(id)?;
    Ok(HttpResult::new(()))
}

async fn list() -> DbResult<HttpResult<Vec<UpstreamCredential>>> {
    let result = UpstreamCredential::list_all()?;
    Ok(HttpResult::new(result))
}

pub fn create_credential_router() -> StateRouter {
    create_state_router().nest(
        "/credential",
        create_state_router()
            .route("/", post(insert_one))
            .route("/{id}", put(update_one))
            .route("/{id}", delete(delete_one))
            .route("/list", get(list)),
    )
}
