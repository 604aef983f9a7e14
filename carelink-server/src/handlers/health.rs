use axum::{extract::State, http::StatusCode, response::Json as ResponseJson, Json};
use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::server::CareLinkServer;

/// Health check response
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub checks: HashMap<String, String>,
}

/// Version information response
#[derive(Debug, Serialize, ToSchema)]
pub struct VersionResponse {
    pub name: String,
    pub version: String,
    pub features: Vec<String>,
}

/// Health check handler
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service health report", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(
    State(server): State<CareLinkServer>,
) -> Result<ResponseJson<HealthResponse>, StatusCode> {
    let mut checks = HashMap::new();

    // Check database connectivity
    let database = match sqlx::query("SELECT 1")
        .execute(server.engine.store().pool())
        .await
    {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };
    checks.insert("database".to_string(), database.to_string());

    let status = if checks.values().all(|check| check == "healthy") {
        "healthy"
    } else {
        "degraded"
    };

    let response = HealthResponse {
        status: status.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks,
    };

    Ok(Json(response))
}

/// Version information handler
#[utoipa::path(
    get,
    path = "/version",
    responses(
        (status = 200, description = "Build and feature information", body = VersionResponse)
    ),
    tag = "health"
)]
pub async fn version_info() -> Result<ResponseJson<VersionResponse>, StatusCode> {
    let features = vec![
        "offline-sync".to_string(),
        "conflict-resolution".to_string(),
        "audit-ledger".to_string(),
        "delta-pull".to_string(),
    ];

    let response = VersionResponse {
        name: "CareLink Sync".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        features,
    };

    Ok(Json(response))
}
