//! Centralized API route path constants
//!
//! Keeps runtime route registrations consistent with the OpenAPI
//! documentation. utoipa `#[path(...)]` attributes carry string literals
//! with `{param}` placeholders; the paths there must match these constants
//! (axum uses `:param` syntax for the same segments).

/// API base path
pub const API_V1: &str = "/api/v1";

/// Health check endpoints
pub mod health {
    pub const HEALTH: &str = "/health";
    pub const VERSION: &str = "/version";
}

/// Sync endpoints, nested under `/api/v1`
pub mod sync {
    pub const BATCH: &str = "/sync/batch";
    pub const CHANGES: &str = "/sync/changes";
    pub const STATUS: &str = "/sync/status/:entity_type/:entity_id";
    pub const AUDIT: &str = "/sync/audit";
}
