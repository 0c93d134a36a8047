//! API error envelope
//!
//! Every failure serializes as `{ request_id, error: { code, message } }`.
//! The status code is derived from the core error taxonomy: validation maps
//! to 400, auth to 401, conflicts to 409, dependencies to 503.

use crate::errors::{CoreError, ValidationError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code (SESSION_EXPIRED, ALL_CREDITS_CONSUMED, ...)
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub request_id: String,
}

impl ApiError {
    /// Wrap a core error, keeping its code and picking the status from its
    /// category. Internal details never reach the client.
    pub fn from_core(request_id: String, err: CoreError) -> Self {
        let status = match &err {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Auth(_) => StatusCode::UNAUTHORIZED,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Dependency(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &err {
            CoreError::Storage(e) => {
                tracing::error!(request_id = %request_id, error = %e, "storage failure");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        Self {
            status,
            code: err.code().to_string(),
            message,
            request_id,
        }
    }

    pub fn bad_request(request_id: String, message: String) -> Self {
        Self::from_core(
            request_id,
            ValidationError::MalformedField(message).into(),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.request_id, self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            request_id: self.request_id,
            error: ErrorBody {
                code: self.code,
                message: self.message,
            },
        });
        (self.status, body).into_response()
    }
}
