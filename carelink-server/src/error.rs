use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use carelink_sync::SyncError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Standard API error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Error type/code
    pub error_type: String,
    /// Human-readable error message
    pub message: String,
    /// Timestamp when error occurred
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Suggested actions for resolving the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
}

/// Standard API success response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

/// Response metadata for pagination, etc.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaginationInfo {
    pub page: i32,
    pub page_size: i32,
    pub total_pages: i32,
    pub has_next: bool,
    pub has_previous: bool,
}

/// Main API error enum
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },
}

impl ApiError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a service unavailable error
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get the error type string
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "validation_error",
            ApiError::NotFound { .. } => "not_found",
            ApiError::Internal { .. } => "internal_error",
            ApiError::ServiceUnavailable { .. } => "service_unavailable",
        }
    }

    /// Get suggested actions for resolving the error
    pub fn suggestions(&self) -> Option<Vec<String>> {
        match self {
            ApiError::Validation { .. } => Some(vec![
                "Check the request payload for invalid fields".to_string(),
                "Ensure all required fields are provided".to_string(),
            ]),
            ApiError::NotFound { .. } => Some(vec![
                "Verify the resource ID is correct".to_string(),
                "Pull the latest changes if your local cache may be stale".to_string(),
            ]),
            ApiError::ServiceUnavailable { .. } => Some(vec![
                "Resubmit the batch after a short delay".to_string(),
                "Contact support if the issue persists".to_string(),
            ]),
            ApiError::Internal { .. } => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_id = Uuid::new_v4().to_string();
        let status_code = self.status_code();

        // Log the error with correlation ID
        error!(
            error_id = %error_id,
            error_type = %self.error_type(),
            status_code = %status_code.as_u16(),
            error = %self,
            "API error occurred"
        );

        let error_response = ApiErrorResponse {
            error_id,
            error_type: self.error_type().to_string(),
            message: self.to_string(),
            timestamp: chrono::Utc::now(),
            suggestions: self.suggestions(),
        };

        (status_code, Json(error_response)).into_response()
    }
}

/// Map sync engine failures onto HTTP error responses.
///
/// Transient storage contention maps to 503 so devices know the whole batch
/// is safe to resubmit as-is.
impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Validation(message) => ApiError::Validation { message },
            SyncError::NotFound(resource) => ApiError::NotFound { resource },
            SyncError::Transient(message) => ApiError::ServiceUnavailable { message },
            SyncError::Database(e) => ApiError::Internal {
                message: format!("Database failure: {}", e),
            },
            other => ApiError::Internal {
                message: other.to_string(),
            },
        }
    }
}

/// Helper function to create successful API responses
pub fn api_success<T>(data: T) -> ApiResponse<T> {
    ApiResponse {
        success: true,
        data,
        metadata: None,
    }
}

/// Helper function to create successful API responses with metadata
pub fn api_success_with_meta<T>(data: T, metadata: ResponseMetadata) -> ApiResponse<T> {
    ApiResponse {
        success: true,
        data,
        metadata: Some(metadata),
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
