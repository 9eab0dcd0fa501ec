//! Unified error handling for the server.
//!
//! Every failure renders as `{errorCode, errorMessage}` with the HTTP status
//! of its code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use duplex_engine::{ErrorCode, ErrorResponse};

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Engine error: {0}")]
    Engine(#[from] duplex_engine::Error),

    #[error("Snapshot IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Engine(e) => e.code(),
            AppError::Io(_) => ErrorCode::Internal,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status =
            StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = match &self {
            AppError::Engine(e) => {
                if status.is_server_error() {
                    tracing::error!("Engine error: {:?}", e);
                } else {
                    tracing::warn!(code = ?code, "Request refused: {}", e);
                }
                ErrorResponse::from(e)
            }
            AppError::Io(e) => {
                tracing::error!("Snapshot IO error: {:?}", e);
                ErrorResponse {
                    error_code: code,
                    error_message: "Internal server error".to_string(),
                }
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
