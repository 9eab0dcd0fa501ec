//! Error types for the Duplex engine.

use crate::protocol::ErrorCode;
use crate::{ItemType, SessionId};
use thiserror::Error;

/// All possible errors from the Duplex engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Protocol and schema errors
    #[error("item type mismatch: expected {expected:?}, got {actual:?}")]
    ItemTypeMismatch {
        expected: Vec<ItemType>,
        actual: Vec<ItemType>,
    },

    #[error("unknown item type: {0}")]
    UnknownItemType(ItemType),

    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("change count mismatch: expected {expected}, got {actual}")]
    ChangeCountMismatch { expected: usize, actual: usize },

    // Session errors
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session limit reached: {0} active sessions")]
    SessionLimit(usize),

    #[error("session {0} belongs to another user")]
    SessionMismatch(SessionId),

    // Authentication errors
    #[error("authentication failed for user '{0}'")]
    BadCredential(String),

    #[error("replayed nonce for user '{0}'")]
    ReplayedNonce(String),

    #[error("request timestamp outside the accepted window: {0}")]
    StaleTimestamp(String),

    #[error("malformed request timestamp: {0}")]
    MalformedTimestamp(String),

    // Commit invariant violations
    #[error("{0} unresolved conflicts remain in staging")]
    UnresolvedConflicts(usize),

    #[error("staged item has no payload: {0}")]
    IncompletePayload(String),

    #[error("reference cycle detected at {0}")]
    ReferenceCycle(String),

    // Store errors
    #[error("item not found: {0}")]
    ItemNotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("{cause} (rollback also failed: {rollback})")]
    RollbackFailed {
        cause: Box<Error>,
        rollback: Box<Error>,
    },
}

impl Error {
    /// Machine-readable code for the wire error envelope.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ItemTypeMismatch { .. } | Error::UnknownItemType(_) => ErrorCode::SchemaMismatch,
            Error::UnknownEndpoint(_) => ErrorCode::UnknownEndpoint,
            Error::InvalidRequest(_)
            | Error::InvalidPayload(_)
            | Error::ChangeCountMismatch { .. } => ErrorCode::InvalidRequest,
            Error::SessionNotFound(_) => ErrorCode::SessionNotFound,
            Error::SessionLimit(_) => ErrorCode::SessionLimit,
            Error::SessionMismatch(_) => ErrorCode::SessionMismatch,
            Error::BadCredential(_) | Error::MalformedTimestamp(_) => {
                ErrorCode::AuthenticationFailed
            }
            Error::ReplayedNonce(_) => ErrorCode::ReplayedNonce,
            Error::StaleTimestamp(_) => ErrorCode::StaleTimestamp,
            Error::UnresolvedConflicts(_) => ErrorCode::Conflict,
            Error::ItemNotFound(_) => ErrorCode::ItemNotFound,
            Error::IncompletePayload(_)
            | Error::ReferenceCycle(_)
            | Error::Store(_)
            | Error::InvalidSnapshot(_) => ErrorCode::Internal,
            Error::RollbackFailed { cause, .. } => cause.code(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
