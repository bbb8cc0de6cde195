use std::collections::HashMap;

use axum::{
    body::Body,
    extract::{Query, Request, State},
    routing::{any, get},
};

use crate::service::app_state::{create_state_router, StateRouter};

use super::auth::authenticate_request;
use super::models::list_models_response;
use super::openai::handle_chat_request;
use super::util::error_response;

/// Routes of the OpenAI-compatible surface, nested under `/v1` by the caller.
pub fn create_proxy_router() -> StateRouter {
    create_state_router()
        .route(
            "/chat/completions",
            any(
                |State(app_state),
                 Query(query_params): Query<HashMap<String, String>>,
                 request: Request<Body>| async move {
                    handle_chat_request(app_state, query_params, request).await
                },
            ),
        )
        .route(
            "/models",
            get(
                |Query(params): Query<HashMap<String, String>>,
                 request: Request<Body>| async move {
                    match authenticate_request(request.headers(), &params) {
                        Ok(_) => list_models_response(),
                        Err((status, message)) => error_response(status, &message),
                    }
                },
            ),
        )
}
