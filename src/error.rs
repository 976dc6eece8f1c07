use axum::{Json, extract::multipart::MultipartError, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

use crate::storage::StorageError;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Multipart error: {0}")]
    MultipartError(String),

    /// A metadata row and the storage directory disagree.
    #[error("Storage inconsistency: {0}")]
    StorageInconsistency(String),

    #[error(transparent)]
    StorageError(#[from] StorageError),

    #[error(transparent)]
    DatabaseError(#[from] sqlx::Error),
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        // The body limit surfaces as a multipart read failure
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(err.body_text())
        } else {
            AppError::MultipartError(err.body_text())
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::MultipartError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            // The client asked for something that can't be served; the
            // server-side detail only goes to the log.
            AppError::StorageInconsistency(_) => StatusCode::NOT_FOUND,
            AppError::StorageError(_) | AppError::DatabaseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message worth showing the user on the next page load, if any.
    /// Server-side failures stay in the log.
    pub fn flash_message(&self) -> Option<String> {
        match self {
            AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::PayloadTooLarge(msg)
            | AppError::UnsupportedMediaType(msg) => Some(format!("{msg}.")),
            _ => None,
        }
    }
}

/// Convert `AppError` into an HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();

        // Map application errors to client-facing messages
        let error_message = match self {
            AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::PayloadTooLarge(msg)
            | AppError::UnsupportedMediaType(msg)
            | AppError::MultipartError(msg) => msg,
            AppError::StorageInconsistency(detail) => {
                tracing::error!("Storage inconsistency: {}", detail);
                "File content is missing".to_string()
            }
            AppError::StorageError(err) => {
                tracing::error!("Storage Error: {}", err);
                "Storage error".to_string()
            }
            AppError::DatabaseError(err) => {
                tracing::error!("Database Error: {}", err);
                "Database error".to_string()
            }
        };

        // Return standardized JSON error response
        let body = Json(json!({"error": error_message}));
        (status, body).into_response()
    }
}
