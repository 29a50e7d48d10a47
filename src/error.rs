//! Error types for the bot server.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or unparsable configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Transport-level failure talking to an upstream HTTP service.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The completion service answered, but not with something usable.
    #[error("ai completion error: {0}")]
    Ai(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Http(_) | AppError::Ai(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Migration(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        (
            status,
            Json(json!({
                "error": self.to_string(),
                "code": status.as_u16(),
            })),
        )
            .into_response()
    }
}
