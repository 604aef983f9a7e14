use axum::{
    routing::{get, post},
    Router,
};

use crate::{
    handlers::{audit, health, sync},
    openapi,
    server::CareLinkServer,
};

pub mod paths;

/// Create health check routes
pub fn health_routes() -> Router<CareLinkServer> {
    Router::new()
        .route(paths::health::HEALTH, get(health::health_check))
        .route(paths::health::VERSION, get(health::version_info))
}

/// Create sync routes for offline-first synchronization
pub fn sync_routes() -> Router<CareLinkServer> {
    Router::new()
        .route(paths::sync::BATCH, post(sync::submit_batch))
        .route(paths::sync::CHANGES, get(sync::pull_changes))
        .route(paths::sync::STATUS, get(sync::entity_status))
}

/// Create audit ledger review routes
pub fn audit_routes() -> Router<CareLinkServer> {
    Router::new().route(paths::sync::AUDIT, get(audit::list_operations))
}

/// Create API v1 routes
pub fn api_v1_routes() -> Router<CareLinkServer> {
    Router::new().merge(sync_routes()).merge(audit_routes())
}

/// Create all application routes
pub fn create_routes() -> Router<CareLinkServer> {
    Router::new()
        // Health check routes (no device context required)
        .merge(health_routes())
        // API documentation routes
        .merge(openapi::create_docs_routes())
        // API v1 routes
        .nest(paths::API_V1, api_v1_routes())
}
