//! Table migration.
//!
//! Push compares the source table with the target's copy. A target without
//! the table gets it created with every source row; otherwise any
//! divergence becomes conflicts for the operator and nothing is written
//! yet. Pull replaces the source's table with the target's wholesale.

use async_trait::async_trait;
use tracing::info;

use envsync_core::{ComponentKind, TransferPayload};

use crate::conflict;
use crate::error::{SyncError, SyncResult};

use super::{fetch_table, ComponentMigrator, MigrationContext, MigrationOutcome};

/// Migrates database tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatabaseMigrator;

#[async_trait]
impl ComponentMigrator for DatabaseMigrator {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Table
    }

    async fn push(&self, ctx: &MigrationContext, name: &str) -> SyncResult<MigrationOutcome> {
        let source = fetch_table(ctx.source.as_ref(), name).await?;
        if !source.exists() {
            return Err(SyncError::Missing(format!(
                "table '{}' does not exist on the source",
                name
            )));
        }
        let target = fetch_table(ctx.target.as_ref(), name).await?;

        let conflicts = conflict::detect(&ctx.operation_id, &source, &target);
        if !conflicts.is_empty() {
            info!(
                operation_id = %ctx.operation_id,
                table = %name,
                conflicts = conflicts.len(),
                "Table diverged"
            );
            return Ok(MigrationOutcome::Conflicts(conflicts));
        }

        let created = !target.exists();
        let report = ctx
            .target
            .send_object(TransferPayload::table(source, false))
            .await?;

        let message = if created {
            format!("created with {} row(s)", report.rows)
        } else {
            format!("no divergence, {} row(s) applied", report.rows)
        };
        Ok(MigrationOutcome::Done(message))
    }

    async fn pull(&self, ctx: &MigrationContext, name: &str) -> SyncResult<MigrationOutcome> {
        let target = fetch_table(ctx.target.as_ref(), name).await?;
        if !target.exists() {
            return Err(SyncError::Missing(format!(
                "table '{}' does not exist on the target",
                name
            )));
        }

        let report = ctx
            .source
            .send_object(TransferPayload::table(target, true))
            .await?;
        Ok(MigrationOutcome::Done(format!(
            "replaced with {} row(s)",
            report.rows
        )))
    }
}
