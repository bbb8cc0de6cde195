use axum::{body::Body, response::Response};
use reqwest::{header::CONTENT_TYPE, StatusCode};
use serde::Serialize;

use crate::config::CONFIG;

#[derive(Debug, Serialize)]
pub(super) struct ModelInfo {
    pub id: String,
    pub object: &'static str,
    pub owned_by: &'static str,
}

#[derive(Debug, Serialize)]
pub(super) struct ModelListResponse {
    pub object: &'static str,
    pub data: Vec<ModelInfo>,
}

/// The static model listing the gateway advertises, served from
/// configuration.
pub(super) fn list_models_response() -> Response<Body> {
    let data: Vec<ModelInfo> = CONFIG
        .models
        .iter()
        .map(|id| ModelInfo {
            id: id.clone(),
            object: "model",
            owned_by: "passage",
        })
        .collect();

    let response_data = ModelListResponse {
        object: "list",
        data,
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&response_data).unwrap()))
        .unwrap()
}
