//! # Error Types
//!
//! Domain error types for envsync-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  envsync-core errors (this module)                                     │
//! │  ├── CoreError        - State machine rule violations                  │
//! │  └── ValidationError  - Request validation failures                    │
//! │                                                                         │
//! │  envsync-db errors     └── DbError     - Operation store failures      │
//! │  envsync-agent errors  └── AgentError  - Installation side failures    │
//! │  envsync-engine errors └── SyncError   - What the orchestrator sees    │
//! │                                                                         │
//! │  Flow: ValidationError → SyncError::InvalidRequest → HTTP 400          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// State machine rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The operation already reached `completed` or `failed`.
    ///
    /// ## When This Occurs
    /// - Calling `fail()` twice
    /// - Recording progress after completion
    #[error("Operation {operation_id} is already {status} and cannot change")]
    OperationFinished {
        operation_id: String,
        status: String,
    },

    /// A transition that the state machine does not allow.
    #[error("Operation {operation_id} cannot move from {from} to {to}")]
    InvalidTransition {
        operation_id: String,
        from: String,
        to: String,
    },

    /// A conflict cannot be applied while its resolution is unset.
    #[error("Conflict {0} has no resolution")]
    UnresolvedConflict(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Request validation errors.
///
/// Raised before any operation record exists, so a rejected request leaves
/// no trace in the operation store.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Invalid format (e.g. a name containing a path separator).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Nothing was selected for migration.
    #[error("selection is empty: choose at least one extension, theme, table or media")]
    EmptySelection,
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
