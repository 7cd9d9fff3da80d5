//! # Sync Error Types
//!
//! Error types for the engine.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Connectivity   │  │ Authentication  │  │     Component           │ │
//! │  │  (fatal)        │  │ (fatal once no  │  │     (per item)          │ │
//! │  │                 │  │  fallback left) │  │                         │ │
//! │  │ ConnectionFailed│  │ Authentication  │  │  Component, Remote,     │ │
//! │  │ InvalidUrl      │  │ PermissionDenied│  │  Missing, Timeout,      │ │
//! │  │                 │  │                 │  │  Archive                │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Request      │  │  Configuration  │  │      Internal           │ │
//! │  │  (400 / 404)    │  │                 │  │                         │ │
//! │  │ InvalidRequest  │  │ InvalidConfig   │  │  Store, Io, Channel,    │ │
//! │  │ OperationNotFnd │  │ ConfigLoad/Save │  │  Internal               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A component error is recorded against its item and the operation moves
//! on. Anything [`SyncError::is_fatal`] stops the operation and marks it
//! `failed`.

use thiserror::Error;

use envsync_agent::AgentError;
use envsync_core::{CoreError, ErrorCode, ValidationError};

/// Result type alias for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Engine error covering every failure of a sync run or a control call.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Connectivity
    // =========================================================================
    /// The installation cannot be reached at all.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A single call exceeded its transport timeout.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // =========================================================================
    // Authentication
    // =========================================================================
    /// The agent or the shell rejected the credential.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The credential is valid but its role may not sync.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // =========================================================================
    // Component
    // =========================================================================
    /// The agent understood the request but could not carry it out.
    #[error("Remote agent error ({code}): {message}")]
    Remote { code: ErrorCode, message: String },

    /// One item could not be migrated.
    #[error("{0}")]
    Component(String),

    /// The item does not exist on the sending side; nothing was transferred.
    #[error("{0}")]
    Missing(String),

    #[error("Archive error: {0}")]
    Archive(String),

    // =========================================================================
    // Request
    // =========================================================================
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Sync operation not found: {0}")]
    OperationNotFound(String),

    // =========================================================================
    // Configuration
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Internal
    // =========================================================================
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// The operation store failed.
    #[error("Operation store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Maps an agent error reply to the engine's taxonomy.
    pub fn from_reply(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::Unauthenticated => SyncError::AuthenticationFailed(message),
            ErrorCode::Forbidden => SyncError::PermissionDenied(message),
            code => SyncError::Remote { code, message },
        }
    }

    /// Returns true if this error must stop the whole operation.
    ///
    /// ## Fatal Errors
    /// - Connectivity: the installation cannot be reached at all
    /// - Authentication after every transport fallback was used
    /// - Operation store failures (progress could no longer be recorded)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::InvalidUrl(_)
                | SyncError::AuthenticationFailed(_)
                | SyncError::PermissionDenied(_)
                | SyncError::Store(_)
        )
    }

    /// Returns true if the credential was rejected.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            SyncError::AuthenticationFailed(_) | SyncError::PermissionDenied(_)
        )
    }

    /// Returns true if repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::ConnectionFailed(_) | SyncError::Timeout(_))
    }

    /// Returns true if the item failed before any transport moved data.
    pub fn is_pre_transfer(&self) -> bool {
        matches!(self, SyncError::Missing(_) | SyncError::InvalidRequest(_))
    }

    /// Returns true for errors the caller caused (HTTP 400).
    pub fn is_client_error(&self) -> bool {
        matches!(self, SyncError::InvalidRequest(_))
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<envsync_db::DbError> for SyncError {
    fn from(err: envsync_db::DbError) -> Self {
        SyncError::Store(err.to_string())
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(e) => SyncError::InvalidRequest(e.to_string()),
            CoreError::UnresolvedConflict(id) => {
                SyncError::InvalidRequest(format!("conflict {} has no resolution", id))
            }
            other => SyncError::Internal(other.to_string()),
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::InvalidRequest(err.to_string())
    }
}

impl From<AgentError> for SyncError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Archive(message) => SyncError::Archive(message),
            AgentError::Io(e) => SyncError::Io(e),
            other => SyncError::from_reply(other.code(), other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Internal(format!("task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(SyncError::ConnectionFailed("refused".into()).is_fatal());
        assert!(SyncError::AuthenticationFailed("bad token".into()).is_fatal());
        assert!(!SyncError::Component("theme missing".into()).is_fatal());
        assert!(!SyncError::Timeout(30).is_fatal());
    }

    #[test]
    fn test_pre_transfer_errors() {
        assert!(SyncError::Missing("theme 'dark' is not installed".into()).is_pre_transfer());
        assert!(!SyncError::Missing("table 'posts' does not exist".into()).is_fatal());
        assert!(!SyncError::Component("agent returned 500".into()).is_pre_transfer());
        assert!(!SyncError::Timeout(30).is_pre_transfer());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("refused".into()).is_retryable());
        assert!(SyncError::Timeout(10).is_retryable());
        assert!(!SyncError::AuthenticationFailed("no".into()).is_retryable());
    }

    #[test]
    fn test_from_reply() {
        let err = SyncError::from_reply(ErrorCode::Forbidden, "editor");
        assert!(err.is_authentication());

        let err = SyncError::from_reply(ErrorCode::NotFound, "no such theme");
        assert!(matches!(err, SyncError::Remote { code: ErrorCode::NotFound, .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_agent_error_mapping() {
        let err: SyncError = AgentError::Unauthenticated("missing".into()).into();
        assert!(matches!(err, SyncError::AuthenticationFailed(_)));

        let err: SyncError = AgentError::Statement {
            table: "posts".into(),
            index: 3,
            message: "syntax".into(),
        }
        .into();
        assert!(err.to_string().contains("posts"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_validation_is_client_error() {
        let err: SyncError = ValidationError::EmptySelection.into();
        assert!(err.is_client_error());
    }
}
