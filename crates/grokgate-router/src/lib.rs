pub mod admin;
pub mod proxy;

use std::sync::Arc;

use axum::Router;

use grokgate_core::GatewayState;

pub use admin::admin_router;
pub use proxy::proxy_router;

pub const LIVENESS_TEXT: &str = "grokgate is running";

/// Every caller-facing route plus the liveness catch-all.
pub fn app_router(gateway: Arc<GatewayState>) -> Router {
    proxy_router(gateway.clone())
        .merge(admin_router(gateway))
        .fallback(liveness)
}

async fn liveness() -> &'static str {
    LIVENESS_TEXT
}
