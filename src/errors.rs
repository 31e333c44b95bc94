//! Error types for the share lifecycle core and the HTTP boundary.
//!
//! `ShareError` is the closed outcome set the lifecycle engine returns;
//! `AppError` is the axum-facing wrapper that maps those outcomes onto
//! status codes. Expired and exhausted shares deliberately present as
//! "not available" at the HTTP level so they cannot be told apart from
//! ids that never existed; the distinction survives only in logs.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Outcomes of share lifecycle operations.
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("share not found")]
    NotFound,
    #[error("share expired")]
    Expired,
    #[error("download quota exhausted")]
    QuotaExhausted,
    #[error("password required")]
    PasswordRequired,
    #[error("wrong password")]
    WrongPassword,
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
    #[error("share record has no backing blob")]
    CorruptedShare,
    #[error("duplicate share id")]
    DuplicateId,
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
    #[error("blob encryption failure: {0}")]
    Crypto(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ShareResult<T> = Result<T, ShareError>;

/// A lightweight wrapper for HTTP-facing errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ShareError> for AppError {
    fn from(err: ShareError) -> Self {
        match err {
            // Expired and exhausted shares must present exactly like
            // unknown ids; the true reason is only logged.
            ShareError::NotFound | ShareError::Expired | ShareError::QuotaExhausted => {
                tracing::info!(reason = %err, "share not available");
                AppError::not_found("share not available")
            }
            ShareError::PasswordRequired => {
                AppError::new(StatusCode::UNAUTHORIZED, "password required")
            }
            ShareError::WrongPassword => AppError::new(StatusCode::FORBIDDEN, "wrong password"),
            ShareError::InvalidPolicy(reason) => AppError::new(StatusCode::BAD_REQUEST, reason),
            ShareError::CorruptedShare => {
                tracing::error!("share record had no backing blob");
                AppError::internal("share unavailable")
            }
            other => {
                tracing::error!(error = %other, "share operation failed");
                AppError::internal("internal error")
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
