//! Error types for the client sync session.

use duplex_engine::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Engine(#[from] duplex_engine::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("compression error: {0}")]
    Io(#[from] std::io::Error),

    /// Structured failure returned by the remote replica
    #[error("remote error {status} ({code:?}): {message}")]
    Remote {
        status: u16,
        code: ErrorCode,
        message: String,
    },

    #[error("sync cancelled")]
    Cancelled,

    #[error("a sync is already running on this session")]
    SyncInProgress,

    #[error("sync session is closed")]
    SessionClosed,

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Wrap an engine failure raised on the remote side of a call.
    pub fn remote(error: &duplex_engine::Error) -> Self {
        let code = error.code();
        Error::Remote {
            status: code.http_status(),
            code,
            message: error.to_string(),
        }
    }

    /// The remote error code, if the remote side refused the call.
    pub fn remote_code(&self) -> Option<ErrorCode> {
        match self {
            Error::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
