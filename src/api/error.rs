//! Error responses for the HTTP layer
//!
//! Every failure is a JSON body `{code, message, resync}`. `resync: true`
//! tells the client to discard its cursor and sync again from version 0.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    ConversationNotFound,
    /// Cursor is ahead of the server or not a version at all
    InvalidCursor,
    /// Cursor points into pruned history
    CursorExpired,
    /// Tick failed, nothing was written; safe to retry
    VersioningFailure,
    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::ConversationNotFound => StatusCode::NOT_FOUND,
            ErrorCode::InvalidCursor => StatusCode::CONFLICT,
            ErrorCode::CursorExpired => StatusCode::GONE,
            ErrorCode::VersioningFailure => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub resync: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<u64>,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            resync: false,
            current_version: None,
        }
    }

    /// A `since` value that is not a version number
    pub fn unreadable_cursor(raw: &str, current: u64) -> Self {
        Self {
            code: ErrorCode::InvalidCursor,
            message: format!("cursor '{}' is not a version number", raw),
            resync: true,
            current_version: Some(current),
        }
    }

    pub fn not_found(id: i64) -> Self {
        Self::new(
            ErrorCode::ConversationNotFound,
            format!("conversation {} not found", id),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        let message = err.to_string();
        match err {
            SyncError::InvalidCursor { current, .. } => Self {
                code: ErrorCode::InvalidCursor,
                message,
                resync: true,
                current_version: Some(current),
            },
            SyncError::CursorExpired { current, .. } => Self {
                code: ErrorCode::CursorExpired,
                message,
                resync: true,
                current_version: Some(current),
            },
            SyncError::NotFound(id) => Self::not_found(id),
            SyncError::Invalid(_) => Self::new(ErrorCode::InvalidInput, message),
            SyncError::VersioningFailure(_) => Self::new(ErrorCode::VersioningFailure, message),
            other => {
                error!(error = %other, "request failed");
                Self::new(ErrorCode::InternalError, "internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code.status_code(), Json(self)).into_response()
    }
}
