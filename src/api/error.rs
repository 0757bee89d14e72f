use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

use crate::jobs::JobError;

use super::models::ErrorResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Gone(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InvalidState(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_FAILED",
            ApiError::InvalidState(_) => "INVALID_STATE",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Gone(_) => "GONE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();

        // Internal detail stays in the logs; callers get a generic body
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                "unexpected error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            code: self.code(),
            message,
        };

        (status, Json(json!(body))).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => ApiError::NotFound(format!("job {id}")),
            JobError::InvalidState(id, status) => {
                ApiError::InvalidState(format!("cannot modify job {id} in {status} state"))
            }
            JobError::Validation(message) => ApiError::Validation(message),
            JobError::Ledger(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<crate::ledger::LedgerError> for ApiError {
    fn from(err: crate::ledger::LedgerError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
