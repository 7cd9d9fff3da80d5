//! # envsync-core: Pure Types and Rules for envsync
//!
//! This crate is the vocabulary shared by the engine, the operation store and
//! the Remote Agent. Everything in here is plain data plus the rules that
//! govern it, with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        envsync Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Control application (external)                     │   │
//! │  │     StartSync ──► GetStatus ──► SubmitConflictResolutions       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ HTTP / JSON                            │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          envsync-engine (Orchestrator, Transports)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ envsync-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │  ┌───────────┐ ┌───────────┐ ┌───────────┐ ┌───────────────┐   │   │
//! │  │  │   types   │ │ operation │ │  payload  │ │   protocol    │   │   │
//! │  │  │Environment│ │SyncOperat.│ │ TableDump │ │ AgentRequest  │   │   │
//! │  │  │ Selection │ │ Conflict  │ │MediaBundle│ │ AgentReply    │   │   │
//! │  │  └───────────┘ └───────────┘ └───────────┘ └───────────────┘   │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        envsync-db (operation store) / envsync-agent (site)      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Environments, credentials, component selection
//! - [`operation`] - The `SyncOperation` state machine
//! - [`conflict`] - Database push conflicts and their resolutions
//! - [`payload`] - The unit moved between installations
//! - [`protocol`] - Remote Agent request/reply messages
//! - [`progress`] - Fixed progress shares per component kind
//! - [`validation`] - Request validation rules
//! - [`error`] - Domain error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod conflict;
pub mod error;
pub mod operation;
pub mod payload;
pub mod progress;
pub mod protocol;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use conflict::{Conflict, ConflictKind, ConflictRows, Resolution};
pub use error::{CoreError, CoreResult, ValidationError};
pub use operation::{ConflictState, ItemResult, OperationStatus, Outcome, SyncOperation};
pub use payload::{
    ApplyReport, FetchRequest, MediaBundle, MediaMeta, MediaRecord, PayloadBody, TableDump,
    TransferPayload,
};
pub use protocol::{AgentReply, AgentRequest, ArtifactInfo, ErrorCode, SiteStatus};
pub use types::*;

// =============================================================================
// Constants
// =============================================================================

/// Default path under an environment's base URL where the Remote Agent listens.
pub const DEFAULT_AGENT_PATH: &str = "/agent/v1";

/// Name used for the single media item of a selection.
pub const MEDIA_ITEM_NAME: &str = "media";
