//! Application error types.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use dsagrind_core::auth::AuthError;
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Too many requests, retry in {retry_after_secs}s")]
    TooManyRequests { retry_after_secs: u64 },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.clone()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.clone()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.clone()),
            AppError::TooManyRequests { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                self.to_string(),
            ),
            AppError::Unavailable(m) => {
                error!(reason = %m, "dependency unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service_unavailable",
                    "Service temporarily unavailable".to_string(),
                )
            }
            AppError::Internal(m) => {
                error!(reason = %m, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };
        let body = Json(ErrorResponse {
            error: code.to_string(),
            message,
        });
        let mut response = (status, body).into_response();
        if let AppError::TooManyRequests { retry_after_secs } = self
            && let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        response
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::RateLimited { retry_after_secs } => {
                AppError::TooManyRequests { retry_after_secs }
            }
            AuthError::InvalidCredentials
            | AuthError::EmailNotVerified
            | AuthError::InvalidToken
            | AuthError::StaleToken
            | AuthError::OAuthFailed(_)
            | AuthError::TokenError(_) => AppError::Unauthorized(e.to_string()),
            AuthError::EmailTaken | AuthError::UsernameTaken => AppError::Conflict(e.to_string()),
            AuthError::UnsupportedProvider(_)
            | AuthError::ValidationError(_)
            | AuthError::PasswordMismatch => AppError::Validation(e.to_string()),
            AuthError::NotFound(what) => AppError::NotFound(what),
            AuthError::Store(e) => AppError::Unavailable(e.to_string()),
            AuthError::Cache(e) => AppError::Unavailable(e.to_string()),
            AuthError::Email(e) => AppError::Internal(e.to_string()),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}
