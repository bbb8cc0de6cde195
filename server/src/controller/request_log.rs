use axum::{extract::Query, routing::get};

use crate::database::request_log::{RequestLog, RequestLogQueryPayload};
use crate::database::{DbResult, ListResult};
use crate::service::app_state::{create_state_router, StateRouter};
use crate::utils::HttpResult;

async fn list(
    Query(payload): Query<RequestLogQueryPayload>,
) -> DbResult<HttpResult<ListResult<RequestLog>>> {
    let result = RequestLog::list(payload)?;
    Ok(HttpResult::new(result))
}

pub fn create_request_log_router() -> StateRouter {
    create_state_router().nest(
        "/request_log",
        create_state_router().route("/list", get(list)),
    )
}
