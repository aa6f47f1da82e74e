//! API error types and JSON error response formatting.
//!
//! Every failure is rendered as `{ "error": code, "message": text }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use askgate_chat::ChatError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400 - missing or invalid input.
    BadRequest(String),
    /// 401 - missing or invalid bearer token.
    Unauthorized(String),
    /// 404 - unknown account or session.
    NotFound(String),
    /// 429 - rate limit exceeded.
    TooManyRequests(String),
    /// 500 - unexpected server error.
    Internal(String),
}

impl ApiError {
    fn parts(self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::TooManyRequests(msg) => {
                (StatusCode::TOO_MANY_REQUESTS, "too_many_requests", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = ErrorBody {
            error: code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Validation(msg) => ApiError::BadRequest(msg),
            e @ (ChatError::AccountNotFound(_) | ChatError::SessionNotFound { .. }) => {
                ApiError::NotFound(e.to_string())
            }
            ChatError::Storage(msg) => {
                error!(error = %msg, "Storage failure while serving request");
                ApiError::Internal("internal storage error".to_string())
            }
        }
    }
}
