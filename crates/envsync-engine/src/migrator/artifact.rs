//! Extension and theme migration.
//!
//! ```text
//! describe on sender ── not installed ──► item fails
//!        │
//!        ▼
//! registry lists it? ── yes ──► receiver installs from registry
//!        │ no (or install failed)
//!        ▼
//! tree copy: sender ──► staging dir ──► receiver   (--delete semantics)
//!        │
//!        ▼
//! active on sender? ── yes ──► activate on receiver
//!        │
//!        ▼
//! settings under the artifact's prefix copied across
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use envsync_core::ComponentKind;

use crate::error::{SyncError, SyncResult};
use crate::transport::{artifact_tree, TransportStrategy, TreeDirection};

use super::{ComponentMigrator, MigrationContext, MigrationOutcome};

/// Migrates extensions or themes.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactMigrator {
    kind: ComponentKind,
}

impl ArtifactMigrator {
    pub fn new(kind: ComponentKind) -> Self {
        ArtifactMigrator { kind }
    }

    async fn transfer(
        &self,
        ctx: &MigrationContext,
        from: &dyn TransportStrategy,
        to: &dyn TransportStrategy,
        name: &str,
    ) -> SyncResult<MigrationOutcome> {
        let kind = self.kind;
        let info = from.describe_artifact(kind, name).await?;
        if !info.installed {
            return Err(SyncError::Missing(format!(
                "{} '{}' is not installed on the sending environment",
                kind, name
            )));
        }

        let mut steps = Vec::new();

        if self.install_from_registry(ctx, to, name).await? {
            steps.push("installed from registry".to_string());
        } else {
            let stage = tempfile::tempdir()?;
            let local = stage.path().join(name);
            let tree = artifact_tree(kind, name)?;

            from.sync_tree(&local, &tree, TreeDirection::Download).await?;
            let report = to.sync_tree(&local, &tree, TreeDirection::Upload).await?;
            debug!(kind = %kind, name = %name, files = report.files, "Tree copied");
            steps.push(format!("copied {} file(s)", report.files));
        }

        if info.active {
            to.activate(kind, name).await?;
            steps.push("activated".to_string());
        }

        let settings = from.get_settings(name).await?;
        if !settings.is_empty() {
            let count = settings.len();
            to.put_settings(settings).await?;
            steps.push(format!("{} setting(s) copied", count));
        }

        info!(operation_id = %ctx.operation_id, kind = %kind, name = %name, "Artifact migrated");
        Ok(MigrationOutcome::Done(steps.join(", ")))
    }

    /// Installs from the registry when it lists the artifact. `false` means
    /// the tree has to be shipped.
    async fn install_from_registry(
        &self,
        ctx: &MigrationContext,
        to: &dyn TransportStrategy,
        name: &str,
    ) -> SyncResult<bool> {
        let listed = match ctx.registry.lookup(self.kind, name).await {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                warn!(kind = %self.kind, name = %name, error = %e, "Registry lookup failed");
                false
            }
        };
        if !listed {
            return Ok(false);
        }

        match to.install_from_registry(self.kind, name).await {
            Ok(message) => {
                debug!(kind = %self.kind, name = %name, message = %message, "Registry install");
                Ok(true)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(
                    kind = %self.kind,
                    name = %name,
                    error = %e,
                    "Registry install failed, shipping the tree instead"
                );
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl ComponentMigrator for ArtifactMigrator {
    fn kind(&self) -> ComponentKind {
        self.kind
    }

    async fn push(&self, ctx: &MigrationContext, name: &str) -> SyncResult<MigrationOutcome> {
        self.transfer(ctx, ctx.source.as_ref(), ctx.target.as_ref(), name)
            .await
    }

    async fn pull(&self, ctx: &MigrationContext, name: &str) -> SyncResult<MigrationOutcome> {
        self.transfer(ctx, ctx.target.as_ref(), ctx.source.as_ref(), name)
            .await
    }
}
