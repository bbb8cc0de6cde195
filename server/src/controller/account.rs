use axum::{
    routing::{get, post},
    Json,
};
use serde::Deserialize;

use crate::database::account::Account;
use crate::database::DbResult;
use crate::service::app_state::{create_state_router, StateRouter};
use crate::utils::HttpResult;

#[derive(Deserialize)]
struct InsertAccountRequest {
    name: String,
}

async fn insert_one(Json(payload): Json<InsertAccountRequest>) -> DbResult<HttpResult<Account>> {
    let created = Account::create(&payload.name)?;
    Ok(HttpResult::new(created))
}

async fn list() -> DbResult<HttpResult<Vec<Account>>> {
    let result = Account::list_all()?;
    Ok(HttpResult::new(result))
}

pub fn create_account_router() -> StateRouter {
    create_state_router().nest(
        "/account",
        create_state_router()
            .route("/", post(insert_one))
            .route("/list", get(list)),
    )
}
