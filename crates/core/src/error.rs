//! Error taxonomy for the operation core, and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// The error kinds named in the operation core's error handling design.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("io error: {0}")]
    IoError(String),

    #[error("canceled")]
    Canceled,

    #[error("timeout")]
    Timeout,

    #[error("stale operation: {0}")]
    Stale(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Common(#[from] shelfkeeper_common::Error),
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::IoError(e.to_string())
    }
}

impl From<redb::Error> for ApiError {
    fn from(e: redb::Error) -> Self {
        ApiError::IoError(e.to_string())
    }
}

impl ApiError {
    fn code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            ApiError::IoError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            ApiError::Canceled => (StatusCode::from_u16(499).unwrap(), "canceled"),
            ApiError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            ApiError::Stale(_) => (StatusCode::INTERNAL_SERVER_ERROR, "stale"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            ApiError::Common(inner) => match inner {
                shelfkeeper_common::Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                shelfkeeper_common::Error::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
                shelfkeeper_common::Error::InvalidInput(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_input")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.code();
        let message = self.to_string();
        let body = Json(json!({ "error": code, "message": message }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = ApiError::NotFound("book x".into());
        assert_eq!(err.code().0, StatusCode::NOT_FOUND);
    }

    #[test]
    fn canceled_maps_to_499() {
        let err = ApiError::Canceled;
        assert_eq!(err.code().0.as_u16(), 499);
    }
}
