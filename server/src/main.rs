use std::net::SocketAddr;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::CONFIG;
use crate::controller::{create_manager_router, handle_404};
use crate::proxy::create_proxy_router;
use crate::service::app_state::{create_app_state, create_state_router};

mod config;
mod controller;
mod database;
mod proxy;
mod schema;
mod service;
mod utils;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(CONFIG.log_level.clone())),
        )
        .init();

    let addr = format!("{}:{}", &CONFIG.host, CONFIG.port);
    info!("server start at {}", &addr);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    let app_state = create_app_state();
    axum::serve(
        listener,
        create_state_router()
            .nest("/v1", create_proxy_router())
            .merge(create_manager_router())
            .fallback(handle_404)
            .with_state(app_state)
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("failed to start server");
}
