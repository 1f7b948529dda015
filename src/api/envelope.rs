//! Shared error envelope for the HTTP surface.
//!
//! Mirrors the teacher's `(StatusCode, Json<ErrorResponse>)` handler
//! rejection shape: every fallible handler returns this on the error path,
//! so the body is always `{"error": "..."}` regardless of which layer the
//! failure came from.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    State(#[from] crate::store::state::StateStoreError),
    #[error(transparent)]
    Queue(#[from] crate::queue::QueueError),
    #[error(transparent)]
    Processor(#[from] crate::processor::ProcessorError),
    #[error(transparent)]
    Batch(#[from] crate::batch::BatchError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::State(_) | ApiError::Queue(_) | ApiError::Processor(_) | ApiError::Batch(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "HTTP request failed");
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}
