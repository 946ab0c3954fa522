//! `ApiError` (§7.1): the HTTP-facing error enum, aligned 1:1 with
//! [`ac_protocol::error::ErrorCode`] rather than the teacher's more generic
//! REST-ish `{NotFound, BadRequest, ...}` set. Grounded on the teacher's
//! `api/error.rs` `IntoResponse`/structured-body/severity-logging shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use ac_protocol::error::ErrorCode;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("session limit reached: {0}")]
    SessionLimit(String),

    #[error("runner limit exceeded: {0}")]
    RunnerLimitExceeded(String),

    #[error("runner not found: {0}")]
    RunnerNotFound(String),

    #[error("runner has active sessions: {0}")]
    RunnerHasActiveSessions(String),

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::BadRequest(_) => ErrorCode::BadRequest,
            ApiError::Unauthorized(_) => ErrorCode::Unauthorized,
            ApiError::Forbidden(_) => ErrorCode::Forbidden,
            ApiError::NotFound(_) => ErrorCode::NotFound,
            ApiError::Conflict(_) => ErrorCode::Conflict,
            ApiError::SessionLimit(_) => ErrorCode::SessionLimit,
            ApiError::RunnerLimitExceeded(_) => ErrorCode::RunnerLimitExceeded,
            ApiError::RunnerNotFound(_) => ErrorCode::RunnerNotFound,
            ApiError::RunnerHasActiveSessions(_) => ErrorCode::RunnerHasActiveSessions,
            ApiError::UnsupportedProvider(_) => ErrorCode::UnsupportedProvider,
            ApiError::InternalError(_) => ErrorCode::InternalError,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) | ApiError::RunnerNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) | ApiError::RunnerHasActiveSessions(_) => StatusCode::CONFLICT,
            ApiError::SessionLimit(_) | ApiError::RunnerLimitExceeded(_) => StatusCode::CONFLICT,
            ApiError::UnsupportedProvider(_) => StatusCode::BAD_REQUEST,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// `{error{code, message, details?}}` (§6).
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        match &self {
            ApiError::InternalError(msg) => tracing::error!(?code, message = %msg, "api error"),
            ApiError::RunnerLimitExceeded(msg) | ApiError::SessionLimit(msg) => {
                tracing::warn!(?code, message = %msg, "capacity error")
            }
            _ => tracing::debug!(?code, message = %message, "client error"),
        }

        let body = ErrorBody {
            error: ErrorDetail { code, message, details: None },
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
