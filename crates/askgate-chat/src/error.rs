//! Error types surfaced by the ask pipeline and session queries.
//!
//! Only failures detected before a response is produced appear here.
//! Classifier degradation and per-store retrieval failures are handled
//! inside the pipeline, and background persistence failures are logged.

use askgate_core::error::AskgateError;

/// Errors returned to callers of the ask pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("session not found: {session_id}")]
    SessionNotFound { owner: String, session_id: String },
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<AskgateError> for ChatError {
    fn from(err: AskgateError) -> Self {
        match err {
            AskgateError::Validation(msg) => ChatError::Validation(msg),
            other => ChatError::Storage(other.to_string()),
        }
    }
}
