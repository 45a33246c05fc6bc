use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Embedding request failed: {0}")]
    EmbeddingError(String),

    #[error("Search backend error: {0}")]
    SearchError(String),

    #[error("Cache store error: {0}")]
    CacheError(String),

    #[error("Invalid input: {0}")]
    ValidationError(String),

    #[error("Service temporarily unavailable: {0}")]
    ResourceError(String),

    #[error("Snapshot error: {0}")]
    SnapshotError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::EmbeddingError(e) => {
                tracing::error!(error = %e, "Embedding provider error");
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            AppError::SearchError(e) => {
                tracing::error!(error = %e, "Search backend error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::CacheError(e) => {
                tracing::error!(error = %e, "Cache store error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::ValidationError(msg) => {
                tracing::warn!(error = %msg, "Validation error");
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            AppError::ResourceError(msg) => {
                tracing::warn!(error = %msg, "Resource error");
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }
            AppError::SnapshotError(msg) => {
                tracing::error!(error = %msg, "Snapshot error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::SearchError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
