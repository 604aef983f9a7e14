use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::server::CareLinkServer;

/// Main OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    paths(
        // Health endpoints
        crate::handlers::health::health_check,
        crate::handlers::health::version_info,

        // Sync endpoints
        crate::handlers::sync::submit_batch,
        crate::handlers::sync::pull_changes,
        crate::handlers::sync::entity_status,

        // Audit endpoints
        crate::handlers::audit::list_operations,
    ),
    components(
        schemas(
            // Health schemas
            crate::handlers::health::HealthResponse,
            crate::handlers::health::VersionResponse,

            // Sync schemas
            crate::handlers::sync::OperationEnvelope,
            crate::handlers::sync::SubmitBatchRequest,
            crate::handlers::sync::OperationReport,
            crate::handlers::sync::SubmitBatchResponse,
            crate::handlers::sync::ChangeEntry,
            crate::handlers::sync::TombstoneEntry,
            crate::handlers::sync::ChangesResponse,
            crate::handlers::sync::EntityStatusResponse,

            // Audit schemas
            crate::handlers::audit::AuditRecord,
        )
    ),
    tags(
        (name = "health", description = "System health and status endpoints"),
        (name = "sync", description = "Offline-first device synchronization"),
        (name = "audit", description = "Sync audit ledger review"),
    ),
    info(
        title = "CareLink Sync API",
        version = "0.1.0",
        description = "Offline sync backend for the CareLink home-care platform: batch intake of device operations, timestamp conflict resolution, checkpointed delta pulls, and audit review.",
        contact(
            name = "CareLink Team",
            email = "team@carelink.health",
            url = "https://carelink.health"
        ),
        license(
            name = "AGPL-3.0-only",
            url = "https://github.com/carelink-health/carelink-engine/blob/main/LICENSE"
        ),
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server"),
    ),
)]
pub struct ApiDoc;

/// Create OpenAPI documentation routes
pub fn create_docs_routes() -> Router<CareLinkServer> {
    Router::new().merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
