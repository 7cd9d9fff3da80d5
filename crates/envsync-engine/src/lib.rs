//! # envsync-engine: Environment Synchronization Engine
//!
//! Moves selected extensions, themes, database tables and the media library
//! between two installations of the same application, and holds an
//! operation for operator decisions when a database push would overwrite
//! diverging rows.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncEngine (orchestrator)                        │  │
//! │  │                                                                  │  │
//! │  │  StartSync ──► spawned run task ──► GetStatus (store)           │  │
//! │  │  progress: 0 ─► 10 ─► 40 ─► 55 ─► 70 ─► 80 ─► 100                │  │
//! │  │            validate ext  themes tables media  done               │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Migrators      │  │ Conflicts      │  │ Transports             │    │
//! │  │                │  │                │  │                        │    │
//! │  │ artifact       │  │ detect on push │  │ Local  (in-process)    │    │
//! │  │ database       │  │ hold operation │  │ Shell  (ssh + rsync)   │    │
//! │  │ media          │  │ apply push/pull│  │ Object (HTTP agent)    │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  EVENTS: Started, Progress, ItemFinished, ConflictsDetected,           │
//! │          Completed, Failed (broadcast, see [`events`])                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`orchestrator`] - `SyncEngine`: control operations and the run task
//! - [`migrator`] - Per-kind push/pull over a pair of transports
//! - [`conflict`] - Divergence detection and resolution application
//! - [`transport`] - Shell, Object and Local strategies and their selection
//! - [`api`] - axum control API
//! - [`events`] - Progress event stream
//! - [`config`] - Engine configuration
//! - [`error`] - Engine error taxonomy
//!
//! ## Example
//! ```rust,ignore
//! let config = EngineConfig::load(None)?;
//! let engine = SyncEngine::from_config(&config).await?;
//!
//! let id = engine.start_sync(request).await?;
//! let op = engine.get_status(&id).await?;
//! ```

pub mod api;
pub mod config;
pub mod conflict;
pub mod error;
pub mod events;
pub mod migrator;
pub mod orchestrator;
pub mod transport;

pub use api::{ControlHandle, ControlServer};
pub use config::{EngineConfig, RegistrySettings, ServerSettings, StoreSettings, TransportSettings};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, NoOpEmitter, SyncEvent, SyncEventEmitter};
pub use migrator::{ComponentMigrator, MigrationContext, MigrationOutcome};
pub use orchestrator::{ResolutionRequest, StartSyncRequest, SyncEngine};
pub use transport::{
    DefaultTransportFactory, LocalSites, LocalTransport, ObjectTransport, ShellTransport,
    TransportFactory, TransportStrategy,
};
