//! Router construction for the sqlgate server.

use std::sync::Arc;

use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Extension, Router,
};
use sqlgate_core::PromotionService;
use tower_http::trace::TraceLayer;

use crate::auth::require_operator;
use crate::handlers;

#[derive(Debug, Clone, Copy)]
pub struct WebhookSettings {
    pub enabled: bool,
}

/// Build the full axum router with all routes and middleware.
pub fn build_router(service: Arc<PromotionService>, webhook: WebhookSettings) -> Router {
    // Operator routes; identity comes from the authenticating proxy
    let protected = Router::new()
        .route("/api/scripts", get(handlers::scripts::list_scripts))
        .route("/api/scripts/:id", get(handlers::scripts::get_script))
        .route(
            "/api/scripts/:id/execute",
            post(handlers::scripts::execute_script),
        )
        .route("/api/history", get(handlers::history::history))
        .route("/api/sync", post(handlers::sync::sync))
        .route("/api/promotion/repair", post(handlers::sync::repair))
        .layer(axum_mw::from_fn(require_operator));

    // Public routes; the webhook authenticates by signature
    let public = Router::new()
        .route("/health", get(handlers::health::health))
        .route(
            "/webhooks/change-source",
            post(handlers::webhook::change_source),
        );

    public
        .merge(protected)
        .layer(Extension(service))
        .layer(Extension(webhook))
        .layer(TraceLayer::new_for_http())
}
