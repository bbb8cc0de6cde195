use axum::body::Body;
use axum::extract::Request;
use axum::http::{self, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::config::CONFIG;

#[derive(Debug)]
pub enum AuthError {
    Empty,
    Invalid,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message) = match self {
            AuthError::Empty => (
                StatusCode::UNAUTHORIZED,
                1001,
                "header Authorization is needed",
            ),
            AuthError::Invalid => (StatusCode::UNAUTHORIZED, 1002, "token invalid"),
        };
        let body = Json(json!({
            "code": error_code,
            "msg": error_message,
        }));
        (status, body).into_response()
    }
}

/// Guards the admin API: requests must carry the configured secret key as a
/// bearer token.
pub async fn authorization_access_middleware(
    req: Request,
    next: Next,
) -> Result<Response<Body>, AuthError> {
    let auth_header = req
        .headers()
        .get(http::header::AUTHORIZATION)
        .ok_or(AuthError::Empty)?;
    let auth_str = auth_header.to_str().map_err(|_| AuthError::Invalid)?;
    let token = auth_str.strip_prefix("Bearer ").ok_or(AuthError::Invalid)?;
    if token != CONFIG.secret_key {
        return Err(AuthError::Invalid);
    }
    Ok(next.run(req).await)
}
