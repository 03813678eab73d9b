use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use leadflow_models::ValidationError;
use thiserror::Error;

use crate::distribution::DistributionError;
use crate::storage::StorageError;

/// Errors returned by HTTP handlers. Rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(entity: &str) -> Self {
        ApiError::NotFound(format!("{entity} not found"))
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            StorageError::Conflict(msg) => ApiError::Conflict(msg),
            StorageError::Invalid(msg) => ApiError::Unprocessable(msg),
            StorageError::Sqlite(_) | StorageError::Json(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<DistributionError> for ApiError {
    fn from(err: DistributionError) -> Self {
        match err {
            DistributionError::Storage(e) => e.into(),
            DistributionError::SweepInProgress => ApiError::Conflict(err.to_string()),
            DistributionError::SweepTimedOut(_) | DistributionError::SweepAborted(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Unprocessable(err.0)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
