use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use super::pool::{CredentialPool, DbStatsSink};
use super::upstream::UpstreamClient;
use crate::config::CONFIG;

/// Shared per-process state for the request pipeline: the credential pool and
/// the upstream HTTP client.
pub struct AppState {
    pub pool: CredentialPool,
    pub upstream: UpstreamClient,
}

pub fn create_app_state() -> Arc<AppState> {
    let pool = CredentialPool::new(
        Duration::from_millis(CONFIG.lease_wait_millis),
        Arc::new(DbStatsSink),
    );
    let upstream = UpstreamClient::from_config().expect("failed to build upstream client");
    Arc::new(AppState { pool, upstream })
}

pub type StateRouter = Router<Arc<AppState>>;

pub fn create_state_router() -> StateRouter {
    Router::<Arc<AppState>>::new()
}
