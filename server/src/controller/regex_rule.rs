use axum::{
    extract::Path,
    routing::{delete, get, post, put},
    Json,
};

use crate::controller::BaseError;
use crate::database::regex_rule::{NewRegexRulePayload, RegexRule, UpdateRegexRuleData};
use crate::database::DbResult;
use crate::service::app_state::{create_state_router, StateRouter};
use crate::service::rewrite::validate_pattern;
use crate::utils::HttpResult;

async fn insert_one(
    Json(payload): Json<NewRegexRulePayload>,
) -> DbResult<HttpResult<RegexRule>> {
    // Patterns that do not compile never reach the store.
    validate_pattern(&payload.pattern)
        .map_err(|e| BaseError::ParamInvalid(Some(format!("invalid pattern: {}", e))))?;

    let created = RegexRule::create(&payload)?;
    Ok(HttpResult::new(created))
}

async fn update_one(
    Path(id): Path<i64>,
    Json(payload): Json<UpdateRegexRuleData>,
) -> DbResult<HttpResult<RegexRule>> {
    if let Some(pattern) = &payload.pattern {
        validate_pattern(pattern)
            .map_err(|e| BaseError::ParamInvalid(Some(format!("invalid pattern: {}", e))))?;
    }

    let updated = RegexRule::update(id, &payload)?;
    Ok(HttpResult::new(updated))
}

async fn delete_one(Path(id): Path<i64>) -> DbResult<HttpResult<()>> {
    RegexRule::delete(id)?;
    Ok(HttpResult::new(()))
}

async fn list() -> DbResult<HttpResult<Vec<RegexRule>>> {
    let result = RegexRule::list_all()?;
    Ok(HttpResult::new(result))
}

pub fn create_regex_rule_router() -> StateRouter {
    create_state_router().nest(
        "/regex_rule",
        create_state_router()
            .route("/", post(insert_one))
            .route("/{id}", put(update_one))
            .route("/{id}", delete(delete_one))
            .route("/list", get(list)),
    )
}
