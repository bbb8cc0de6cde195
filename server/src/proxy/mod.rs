mod auth;
mod logging;
mod models;
mod openai;
mod relay;
mod router;
mod util;

pub use router::create_proxy_router;
