//! HTTP error mapping.

use crate::api::types::ErrorResponse;
use crate::error::MerkmalError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// An error with an HTTP status. Anything the caller can fix is 400;
/// everything else is 500.
#[derive(Debug)]
pub enum ApiError {
    Validation(MerkmalError),
    Internal(MerkmalError),
}

impl ApiError {
    pub fn validation(err: MerkmalError) -> Self {
        ApiError::Validation(err)
    }

    pub fn internal(err: MerkmalError) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, err) = match self {
            ApiError::Validation(err) => (StatusCode::BAD_REQUEST, err),
            ApiError::Internal(err) => (StatusCode::INTERNAL_SERVER_ERROR, err),
        };
        let body = ErrorResponse {
            error_type: match &err {
                MerkmalError::Io(_) => "io",
                MerkmalError::Validation { .. } => "validation",
                _ => "internal",
            }
            .to_string(),
            message: err.to_string(),
            status_code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}
