//! CareLink Sync Server - offline-first home-care platform API
//!
//! HTTP surface over the sync engine: batch intake of device operations,
//! checkpointed delta pulls, per-entity sync status, audit ledger review,
//! and interactive API documentation.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod server;
pub mod types;

// Re-export commonly used types
pub use error::{ApiError, ApiResponse, ApiResult};
pub use server::CareLinkServer;

use axum::{middleware::from_fn, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Create the main application router with all routes and middleware
pub fn create_app(server: CareLinkServer) -> Router {
    routes::create_routes()
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::create_cors_layer())
                .layer(from_fn(middleware::request_timing_middleware)),
        )
        .with_state(server)
}
