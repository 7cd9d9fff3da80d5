//! Media library migration. The receiving side skips records it already
//! has, so repeating a migration is harmless.

use async_trait::async_trait;

use envsync_core::{ApplyReport, ComponentKind, FetchRequest, MEDIA_ITEM_NAME};

use crate::error::SyncResult;
use crate::transport::TransportStrategy;

use super::{ComponentMigrator, MigrationContext, MigrationOutcome};

/// Migrates the media library.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaMigrator;

impl MediaMigrator {
    async fn transfer(
        &self,
        from: &dyn TransportStrategy,
        to: &dyn TransportStrategy,
    ) -> SyncResult<MigrationOutcome> {
        let payload = from
            .fetch_object(FetchRequest::new(ComponentKind::Media, MEDIA_ITEM_NAME))
            .await?;
        let report = to.send_object(payload).await?;
        Ok(MigrationOutcome::Done(describe(&report)))
    }
}

fn describe(report: &ApplyReport) -> String {
    format!(
        "{} record(s) imported, {} already present, {} file(s) written",
        report.rows, report.skipped, report.files
    )
}

#[async_trait]
impl ComponentMigrator for MediaMigrator {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Media
    }

    async fn push(&self, ctx: &MigrationContext, _name: &str) -> SyncResult<MigrationOutcome> {
        self.transfer(ctx.source.as_ref(), ctx.target.as_ref()).await
    }

    async fn pull(&self, ctx: &MigrationContext, _name: &str) -> SyncResult<MigrationOutcome> {
        self.transfer(ctx.target.as_ref(), ctx.source.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_report() {
        let report = ApplyReport {
            rows: 2,
            skipped: 3,
            files: 2,
            ..Default::default()
        };
        assert_eq!(
            describe(&report),
            "2 record(s) imported, 3 already present, 2 file(s) written"
        );
    }
}
