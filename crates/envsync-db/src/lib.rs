//! # envsync-db: Operation Store for envsync
//!
//! This crate persists the only durable state the engine owns: SyncOperation
//! records and the Conflicts of database pushes. It uses SQLite through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        envsync Data Flow                                │
//! │                                                                         │
//! │  Orchestrator task (one per operation)                                 │
//! │       │ save(&SyncOperation)          ▲ GetStatus / ListConflicts      │
//! │       ▼                               │ (readers, any task)            │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    envsync-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌──────────────────┐   ┌─────────────┐  │   │
//! │  │   │   Database    │    │  Repositories    │   │ Migrations  │  │   │
//! │  │   │   (pool.rs)   │◄───│ OperationRepo    │   │ (embedded)  │  │   │
//! │  │   │  SqlitePool   │    │ ConflictRepo     │   │ 0001, 0002  │  │   │
//! │  │   └───────────────┘    └──────────────────┘   └─────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SQLite: sync_operations, sync_conflicts                        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use envsync_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("envsync.db")).await?;
//! db.operations().insert(&operation).await?;
//! let conflicts = db.conflicts().list(&operation.id).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::conflict::ConflictRepository;
pub use repository::operation::OperationRepository;
