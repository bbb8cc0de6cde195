use axum::{
    body::{Body, Bytes},
    extract::Request,
    response::Response,
};
use reqwest::{header::CONTENT_TYPE, StatusCode};
use serde_json::json;

// OpenAI error taxonomy for the status codes this gateway emits.
pub(super) fn error_type_for_status(status: StatusCode) -> &'static str {
    match status {
        StatusCode::UNAUTHORIZED => "invalid_api_key",
        StatusCode::BAD_REQUEST => "invalid_request_error",
        StatusCode::TOO_MANY_REQUESTS => "rate_limit_exceeded",
        StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => "upstream_error",
        _ => "api_error",
    }
}

/// An OpenAI-shaped JSON error body.
pub(super) fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    let body = json!({
        "error": {
            "message": message,
            "type": error_type_for_status(status),
            "code": status.as_u16(),
        }
    });
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub(super) async fn read_request_body(request: Request<Body>) -> Result<Bytes, (StatusCode, String)> {
    axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read body: {}", e)))
}
