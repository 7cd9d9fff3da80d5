//! # Component Migrators
//!
//! One migrator per component kind. The orchestrator hands each selected
//! item to the migrator for its kind together with the operation's two
//! transports; the migrator decides how the item moves.
//!
//! ```text
//!                      push: source ──► target
//!                      pull: target ──► source
//!
//! ┌────────────────────┬──────────────────────────────────────────────────┐
//! │ ArtifactMigrator   │ registry install or tree copy, activation,       │
//! │ (extension, theme) │ settings                                         │
//! ├────────────────────┼──────────────────────────────────────────────────┤
//! │ DatabaseMigrator   │ push: compare dumps, create or report conflicts  │
//! │ (table)            │ pull: replace the source table                   │
//! ├────────────────────┼──────────────────────────────────────────────────┤
//! │ MediaMigrator      │ bundle export/import, existing records skipped   │
//! └────────────────────┴──────────────────────────────────────────────────┘
//! ```
//!
//! A migrator returns `Err` for a failed item. The orchestrator decides from
//! [`SyncError::is_fatal`](crate::SyncError::is_fatal) whether that ends the
//! operation or only the item.

pub mod artifact;
pub mod database;
pub mod media;

use std::sync::Arc;

use async_trait::async_trait;

use envsync_agent::RegistryClient;
use envsync_core::{
    ComponentKind, Conflict, Direction, FetchRequest, PayloadBody, TableDump, TransportKind,
};

use crate::error::{SyncError, SyncResult};
use crate::transport::TransportStrategy;

pub use artifact::ArtifactMigrator;
pub use database::DatabaseMigrator;
pub use media::MediaMigrator;

/// What a migrator works with for one operation.
#[derive(Clone)]
pub struct MigrationContext {
    pub operation_id: String,
    pub direction: Direction,
    pub source: Arc<dyn TransportStrategy>,
    pub target: Arc<dyn TransportStrategy>,
    /// Consulted before shipping an artifact tree.
    pub registry: Arc<dyn RegistryClient>,
}

impl MigrationContext {
    /// `(sending, receiving)` transports for the operation's direction.
    pub fn endpoints(&self) -> (&dyn TransportStrategy, &dyn TransportStrategy) {
        match self.direction {
            Direction::Push => (self.source.as_ref(), self.target.as_ref()),
            Direction::Pull => (self.target.as_ref(), self.source.as_ref()),
        }
    }

    /// Transport recorded on item results: the one that received the item.
    pub fn item_transport(&self) -> TransportKind {
        self.endpoints().1.kind()
    }
}

/// Result of migrating one item.
#[derive(Debug)]
pub enum MigrationOutcome {
    /// Migrated; the message goes on the item result.
    Done(String),
    /// Held back until an operator resolves every conflict.
    Conflicts(Vec<Conflict>),
}

/// Moves items of one component kind.
#[async_trait]
pub trait ComponentMigrator: Send + Sync {
    fn kind(&self) -> ComponentKind;

    async fn push(&self, ctx: &MigrationContext, name: &str) -> SyncResult<MigrationOutcome>;

    async fn pull(&self, ctx: &MigrationContext, name: &str) -> SyncResult<MigrationOutcome>;

    async fn migrate(&self, ctx: &MigrationContext, name: &str) -> SyncResult<MigrationOutcome> {
        match ctx.direction {
            Direction::Push => self.push(ctx, name).await,
            Direction::Pull => self.pull(ctx, name).await,
        }
    }
}

/// The migrator responsible for `kind`.
pub fn migrator_for(kind: ComponentKind) -> Box<dyn ComponentMigrator> {
    match kind {
        ComponentKind::Extension | ComponentKind::Theme => Box::new(ArtifactMigrator::new(kind)),
        ComponentKind::Table => Box::new(DatabaseMigrator),
        ComponentKind::Media => Box::new(MediaMigrator),
    }
}

/// Exports one table's dump.
pub(crate) async fn fetch_table(transport: &dyn TransportStrategy, table: &str) -> SyncResult<TableDump> {
    let payload = transport
        .fetch_object(FetchRequest::new(ComponentKind::Table, table))
        .await?;
    match payload.body {
        PayloadBody::Table { dump, .. } => Ok(dump),
        _ => Err(SyncError::Component(format!(
            "table '{}' was not exported as a dump",
            table
        ))),
    }
}
