//! Error types for campaign query resolution.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised while turning free text into filters or SQL.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Query is empty; enter a question about campaigns, recipients or events")]
    EmptyQuery,

    #[error("Language model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Generated SQL rejected: {0}")]
    UnsafeSql(String),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),
}

impl From<LlmError> for QueryError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::InferenceFailed { reason } => QueryError::MalformedResponse(reason),
            other => QueryError::ModelUnavailable(other.to_string()),
        }
    }
}

/// Local model errors.
///
/// `Clone` so a failed session can hand the same cause to every later caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("Model file not found: {path}")]
    ModelNotFound { path: String },

    #[error("Model load failed: {reason}")]
    LoadFailure { reason: String },

    #[error("Model memory layout incompatible: {reason}")]
    IncompatibleLayout { reason: String },

    #[error("Model load timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Inference failed: {reason}")]
    InferenceFailed { reason: String },
}

/// Errors from the read-only analytics collaborators.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Collaborator {collaborator} query failed: {reason}")]
    QueryFailed {
        collaborator: String,
        reason: String,
    },
}
