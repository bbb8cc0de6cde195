use axum::{http, middleware, response::IntoResponse};

use crate::service::app_state::{create_state_router, StateRouter};
use crate::utils::auth::authorization_access_middleware;

mod account;
mod credential;
mod error;
mod preset;
mod regex_rule;
mod request_log;
mod tenant_key;

pub use error::BaseError;

pub fn create_manager_router() -> StateRouter {
    let api_router = create_state_router().nest(
        "/api",
        create_state_router()
            .merge(account::create_account_router())
            .merge(tenant_key::create_tenant_key_router())
            .merge(credential::create_credential_router())
            .merge(preset::create_preset_router())
            .merge(regex_rule::create_regex_rule_router())
            .merge(request_log::create_request_log_router())
            .layer(middleware::from_fn(authorization_access_middleware)),
    );

    create_state_router().nest("/manager", api_router)
}

pub async fn handle_404() -> impl IntoResponse {
    (http::StatusCode::NOT_FOUND, "not found")
}
