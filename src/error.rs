use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::time::Duration;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// No bus session became available within the readiness bound.
    #[error("message bus unavailable: {0}")]
    TransportUnavailable(String),

    #[error("message bus connection lost: {0}")]
    ConnectionLost(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("key store failure: {0}")]
    Store(String),

    #[error("malformed message on {topic}: {reason}")]
    MalformedMessage { topic: String, reason: String },

    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Store(e.to_string())
    }
}

impl AppError {
    pub fn malformed(topic: impl Into<String>, reason: impl ToString) -> Self {
        AppError::MalformedMessage {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) | AppError::MalformedMessage { .. } => 400,
            AppError::TransportUnavailable(_) | AppError::ConnectionLost(_) => 503,
            _ => 500,
        }
    }
}

// The HTTP surface is binary: callers only ever see "success" or "error".
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(ResponseError::status_code(self)).json("error")
    }
}
