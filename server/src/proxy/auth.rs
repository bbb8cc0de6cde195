use std::collections::HashMap;

use axum::http::HeaderMap;
use reqwest::{header::AUTHORIZATION, StatusCode};
use tracing::{debug, error, warn};

use crate::database::account::Account;
use crate::database::tenant_key::{TenantKey, TENANT_KEY_PREFIX};

pub struct AuthedTenant {
    pub key: TenantKey,
    pub account: Account,
}

const BEARER_PREFIX: &str = "Bearer ";

pub fn parse_token_from_request(
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> Result<String, String> {
    if let Some(auth_header_value) = headers.get(AUTHORIZATION) {
        if let Ok(auth_str) = auth_header_value.to_str() {
            if let Some(token) = auth_str.strip_prefix(BEARER_PREFIX) {
                if !token.is_empty() {
                    return Ok(token.to_string());
                }
            }
        }
    }

    // Fallback to query parameter
    params.get("key").cloned().ok_or_else(|| {
        "Missing API key. Provide it in 'Authorization' header or 'key' query parameter.".to_string()
    })
}

/// Authenticates an inbound request against the tenant-key store.
pub fn authenticate_request(
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> Result<AuthedTenant, (StatusCode, String)> {
    debug!("authenticating inbound request");
    let key_str = parse_token_from_request(headers, params).map_err(|err_msg| {
        warn!("auth failed: {}", err_msg);
        (StatusCode::UNAUTHORIZED, err_msg)
    })?;

    if !key_str.starts_with(TENANT_KEY_PREFIX) {
        warn!("auth failed: key has wrong prefix");
        return Err((
            StatusCode::UNAUTHORIZED,
            format!("Invalid api key format. Must start with '{}'", TENANT_KEY_PREFIX),
        ));
    }

    match TenantKey::find_active_with_account(&key_str) {
        Ok(Some((key, account))) => Ok(AuthedTenant { key, account }),
        Ok(None) => {
            warn!("auth failed: key invalid, disabled, or deleted");
            Err((
                StatusCode::UNAUTHORIZED,
                "api key invalid or not found".to_string(),
            ))
        }
        Err(e) => {
            error!("store error while checking api key: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error while checking API key".to_string(),
            ))
        }
    }
}
