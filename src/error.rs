use crate::coordinator::CoordinatorError;
use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use serde_json::json;
use thiserror::Error;

/// Flat error taxonomy shared across every HTTP handler. Each variant maps
/// to exactly one status code and one stable `error` string in the JSON
/// body clients match on.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("authentication required")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("queue is closed")]
    QueueClosed,
    #[error("queue is full")]
    QueueFull,
    #[error("party is already in a terminal state")]
    TerminalState,
    #[error("captcha verification failed")]
    CaptchaFailed,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("upstream service error: {0}")]
    Upstream(String),
    #[error("coordinator is busy, try again")]
    Busy,
    #[error("party has already joined this queue")]
    AlreadyJoined,
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::QueueClosed => Self::QueueClosed,
            CoordinatorError::QueueFull => Self::QueueFull,
            CoordinatorError::PartyNotFound => Self::NotFound,
            CoordinatorError::TerminalState => Self::TerminalState,
            CoordinatorError::Busy => Self::Busy,
            CoordinatorError::Storage(detail) => Self::Storage(detail),
            CoordinatorError::AlreadyJoined => Self::AlreadyJoined,
        }
    }
}

impl From<crate::db::StorageError> for ApiError {
    fn from(err: crate::db::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl ApiError {
    const fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::QueueClosed => "queue_closed",
            Self::QueueFull => "queue_full",
            Self::TerminalState => "terminal_state",
            Self::CaptchaFailed => "captcha_failed",
            Self::Storage(_) => "storage_error",
            Self::Upstream(_) => "upstream_error",
            Self::Busy => "busy",
            Self::AlreadyJoined => "already_joined",
        }
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::QueueClosed | Self::QueueFull | Self::TerminalState => StatusCode::CONFLICT,
            Self::CaptchaFailed => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Busy => StatusCode::SERVICE_UNAVAILABLE,
            Self::AlreadyJoined => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.code(), "detail": self.to_string() }));
        (status, body).into_response()
    }
}
