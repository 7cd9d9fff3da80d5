//! # Agent Error Types
//!
//! Every failure on the installation side ends up as an
//! [`AgentReply::Error`] with a machine-readable [`ErrorCode`], whichever
//! surface carried the request.
//!
//! ```text
//! AgentError ──► code()   ──► ErrorCode     (stdin/stdout, in-process)
//!            └─► IntoResponse ──► HTTP status + JSON AgentReply::Error
//!
//!   Unauthenticated  401      NotFound        404
//!   Forbidden        403      InvalidRequest  400
//!   Statement/Registry/Archive  422           everything else  500
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use envsync_core::{AgentReply, ErrorCode, ValidationError};

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Remote Agent errors.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Missing, malformed or unknown credential.
    #[error("Authentication required: {0}")]
    Unauthenticated(String),

    /// Valid credential whose role may not sync.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// One statement of a table import failed; the table import was rolled back.
    #[error("Import of table '{table}' failed at statement {index}: {message}")]
    Statement {
        table: String,
        index: usize,
        message: String,
    },

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Site database error: {0}")]
    Database(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Wire category of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            AgentError::Unauthenticated(_) => ErrorCode::Unauthenticated,
            AgentError::Forbidden(_) => ErrorCode::Forbidden,
            AgentError::NotFound(_) => ErrorCode::NotFound,
            AgentError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            _ => ErrorCode::Failed,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AgentError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AgentError::Forbidden(_) => StatusCode::FORBIDDEN,
            AgentError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AgentError::Statement { .. } | AgentError::Registry(_) | AgentError::Archive(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The reply carried back to the engine.
    pub fn to_reply(&self) -> AgentReply {
        AgentReply::Error {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_reply())).into_response()
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<sqlx::Error> for AgentError {
    fn from(err: sqlx::Error) -> Self {
        AgentError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AgentError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AgentError::Database(format!("migration failed: {}", err))
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Serialization(err.to_string())
    }
}

impl From<ValidationError> for AgentError {
    fn from(err: ValidationError) -> Self {
        AgentError::InvalidRequest(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AgentError {
    fn from(err: tokio::task::JoinError) -> Self {
        AgentError::Internal(format!("blocking task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_status() {
        let err = AgentError::Forbidden("editor".into());
        assert_eq!(err.code(), ErrorCode::Forbidden);
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let err = AgentError::Statement {
            table: "posts".into(),
            index: 3,
            message: "no such column".into(),
        };
        assert_eq!(err.code(), ErrorCode::Failed);
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(err.to_string().contains("statement 3"));
    }

    #[test]
    fn test_reply_carries_message() {
        match AgentError::NotFound("extension seo".into()).to_reply() {
            AgentReply::Error { code, message } => {
                assert_eq!(code, ErrorCode::NotFound);
                assert!(message.contains("extension seo"));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }
}
