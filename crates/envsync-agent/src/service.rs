//! # Agent Service
//!
//! Executes one [`AgentRequest`] against a [`Site`]. Every surface (HTTP,
//! stdin/stdout, in-process) funnels into [`AgentService::dispatch`].
//!
//! ```text
//! Status               ──► Site::status
//! DescribeArtifact     ──► installed? active?
//! InstallFromRegistry  ──► registry.lookup → download → unpack (replace)
//! Activate             ──► options
//! GetSettings/Put      ──► options, by key prefix
//! Fetch                ──► archive | table dump | media bundle
//! Apply                ──► unpack | statements | idempotent media insert
//! DeleteRows           ──► DELETE ... WHERE key IS literal
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};

use envsync_core::validation::validate_name;
use envsync_core::{
    AgentReply, AgentRequest, ApplyReport, ArtifactInfo, ComponentKind, FetchRequest, PayloadBody,
    TransferPayload,
};

use crate::archive::{self, UnpackMode};
use crate::error::{AgentError, AgentResult};
use crate::registry::{NoRegistry, RegistryClient};
use crate::site::Site;
use crate::{media, tables};

/// Request handler bound to one installation.
#[derive(Clone)]
pub struct AgentService {
    site: Site,
    registry: Arc<dyn RegistryClient>,
}

impl AgentService {
    pub fn new(site: Site, registry: Arc<dyn RegistryClient>) -> Self {
        AgentService { site, registry }
    }

    /// A service whose installation cannot install from any registry.
    pub fn offline(site: Site) -> Self {
        Self::new(site, Arc::new(NoRegistry))
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    /// Executes a request, turning failures into an error reply.
    pub async fn handle(&self, request: AgentRequest) -> AgentReply {
        let request_type = request.type_name();
        match self.dispatch(request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(request = request_type, error = %e, "Agent request failed");
                e.to_reply()
            }
        }
    }

    /// Executes a request.
    pub async fn dispatch(&self, request: AgentRequest) -> AgentResult<AgentReply> {
        debug!(request = request.type_name(), "Dispatching agent request");

        match request {
            AgentRequest::Status => Ok(AgentReply::Status(self.site.status().await?)),

            AgentRequest::DescribeArtifact { kind, name } => {
                let installed = self.site.is_installed(kind, &name).await?;
                let active = installed && self.site.is_active(kind, &name).await?;
                Ok(AgentReply::Artifact(ArtifactInfo {
                    kind,
                    name,
                    installed,
                    active,
                }))
            }

            AgentRequest::InstallFromRegistry { kind, name } => {
                self.install_from_registry(kind, &name).await
            }

            AgentRequest::Activate { kind, name } => {
                self.site.activate(kind, &name).await?;
                Ok(AgentReply::done(format!("activated {} {}", kind, name)))
            }

            AgentRequest::GetSettings { prefix } => Ok(AgentReply::Settings {
                settings: self.site.settings_with_prefix(&prefix).await?,
            }),

            AgentRequest::PutSettings { settings } => {
                let written = self.site.put_settings(&settings).await?;
                Ok(AgentReply::done(format!("wrote {} setting(s)", written)))
            }

            AgentRequest::Fetch(request) => Ok(AgentReply::Payload(self.export(&request).await?)),

            AgentRequest::Apply(payload) => Ok(AgentReply::Applied(self.import(payload).await?)),

            AgentRequest::DeleteRows {
                table,
                key_columns,
                keys,
            } => {
                let report =
                    tables::delete_rows(self.site.pool(), &table, &key_columns, &keys).await?;
                Ok(AgentReply::Applied(report))
            }
        }
    }

    /// Exports one component.
    pub async fn export(&self, request: &FetchRequest) -> AgentResult<TransferPayload> {
        match request.kind {
            ComponentKind::Extension | ComponentKind::Theme => {
                if !self.site.is_installed(request.kind, &request.name).await? {
                    return Err(AgentError::NotFound(format!(
                        "{} '{}' is not installed",
                        request.kind, request.name
                    )));
                }
                let path = self.site.artifact_path(request.kind, &request.name)?;
                let data = archive::pack_dir_blocking(path).await?;
                Ok(TransferPayload::archive(request.kind, &request.name, data))
            }
            ComponentKind::Table => {
                validate_name("table", &request.name)?;
                let dump = tables::dump_table(self.site.pool(), &request.name).await?;
                Ok(TransferPayload::table(dump, false))
            }
            ComponentKind::Media => Ok(TransferPayload::media(media::export_bundle(&self.site).await?)),
        }
    }

    /// Imports one component.
    pub async fn import(&self, payload: TransferPayload) -> AgentResult<ApplyReport> {
        let TransferPayload { kind, name, body } = payload;

        let report = match (kind, body) {
            (ComponentKind::Extension | ComponentKind::Theme, PayloadBody::Archive { data }) => {
                let path = self.site.artifact_path(kind, &name)?;
                let files = archive::unpack_blocking(data, path, UnpackMode::Replace).await?;
                ApplyReport {
                    files,
                    ..Default::default()
                }
            }
            (ComponentKind::Table, PayloadBody::Table { dump, replace }) => {
                validate_name("table", &name)?;
                if dump.table != name {
                    return Err(AgentError::InvalidRequest(format!(
                        "payload '{}' carries a dump of '{}'",
                        name, dump.table
                    )));
                }
                tables::apply_dump(self.site.pool(), &dump, replace).await?
            }
            (ComponentKind::Media, PayloadBody::Media { bundle }) => {
                media::apply_bundle(&self.site, &bundle).await?
            }
            (kind, _) => {
                return Err(AgentError::InvalidRequest(format!(
                    "payload body does not match component kind {}",
                    kind
                )))
            }
        };

        info!(
            kind = %kind,
            name = %name,
            rows = report.rows,
            files = report.files,
            "Imported component"
        );
        Ok(report)
    }

    async fn install_from_registry(&self, kind: ComponentKind, name: &str) -> AgentResult<AgentReply> {
        let path = self.site.artifact_path(kind, name)?;
        let entry = self
            .registry
            .lookup(kind, name)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("{} '{}' is not in the registry", kind, name)))?;

        let data = self.registry.download(&entry).await?;
        let files = archive::unpack_blocking(data, path, UnpackMode::Replace).await?;

        info!(kind = %kind, name = %name, version = %entry.version, files, "Installed from registry");
        Ok(AgentReply::done(format!(
            "installed {} {} {} from registry",
            kind, name, entry.version
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use envsync_core::ErrorCode;

    use crate::registry::MemoryRegistry;

    use super::*;

    async fn service() -> (tempfile::TempDir, AgentService) {
        let dir = tempfile::tempdir().unwrap();
        let site = Site::open(dir.path()).await.unwrap();
        (dir, AgentService::offline(site))
    }

    fn install(dir: &tempfile::TempDir, kind_dir: &str, name: &str) {
        let path = dir.path().join(kind_dir).join(name);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("main.php"), name).unwrap();
    }

    #[tokio::test]
    async fn test_describe_and_activate() {
        let (dir, service) = service().await;
        install(&dir, "extensions", "seo");

        let reply = service
            .dispatch(AgentRequest::DescribeArtifact {
                kind: ComponentKind::Extension,
                name: "seo".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            reply,
            AgentReply::Artifact(ArtifactInfo {
                kind: ComponentKind::Extension,
                name: "seo".into(),
                installed: true,
                active: false,
            })
        );

        service
            .dispatch(AgentRequest::Activate {
                kind: ComponentKind::Extension,
                name: "seo".into(),
            })
            .await
            .unwrap();
        assert!(service
            .site()
            .is_active(ComponentKind::Extension, "seo")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_export_import_artifact_between_sites() {
        let (src_dir, source) = service().await;
        install(&src_dir, "themes", "dark");
        let (dst_dir, target) = service().await;

        let payload = source
            .export(&FetchRequest::new(ComponentKind::Theme, "dark"))
            .await
            .unwrap();
        let report = target.import(payload).await.unwrap();

        assert_eq!(report.files, 1);
        assert!(dst_dir.path().join("themes/dark/main.php").is_file());
    }

    #[tokio::test]
    async fn test_export_missing_artifact() {
        let (_dir, service) = service().await;
        let reply = service
            .handle(AgentRequest::Fetch(FetchRequest::new(ComponentKind::Extension, "ghost")))
            .await;
        match reply {
            AgentReply::Error { code, .. } => assert_eq!(code, ErrorCode::NotFound),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_import_dot_name_leaves_extensions_intact() {
        let (src_dir, source) = service().await;
        install(&src_dir, "extensions", "seo");
        let data = source
            .export(&FetchRequest::new(ComponentKind::Extension, "seo"))
            .await
            .unwrap();
        let PayloadBody::Archive { data } = data.body else {
            panic!("expected an archive payload");
        };

        let (dir, target) = service().await;
        install(&dir, "extensions", "keep_me");
        install(&dir, "extensions", "shop");

        let payload = TransferPayload::archive(ComponentKind::Extension, ".", data);
        let err = target.import(payload).await.unwrap_err();

        assert!(matches!(err, AgentError::InvalidRequest(_)));
        assert!(dir.path().join("extensions/keep_me/main.php").is_file());
        assert!(dir.path().join("extensions/shop/main.php").is_file());
    }

    #[tokio::test]
    async fn test_mismatched_payload_rejected() {
        let (_dir, service) = service().await;
        let payload = TransferPayload::archive(ComponentKind::Table, "posts", vec![]);
        let err = service.import(payload).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_install_from_registry() {
        let published = tempfile::tempdir().unwrap();
        std::fs::write(published.path().join("cache.php"), "cache").unwrap();
        let registry = MemoryRegistry::new();
        registry.publish(
            ComponentKind::Extension,
            "cache",
            archive::pack_dir(published.path()).unwrap(),
        );

        let dir = tempfile::tempdir().unwrap();
        let site = Site::open(dir.path()).await.unwrap();
        let service = AgentService::new(site, Arc::new(registry));

        service
            .dispatch(AgentRequest::InstallFromRegistry {
                kind: ComponentKind::Extension,
                name: "cache".into(),
            })
            .await
            .unwrap();
        assert!(dir.path().join("extensions/cache/cache.php").is_file());

        let err = service
            .dispatch(AgentRequest::InstallFromRegistry {
                kind: ComponentKind::Extension,
                name: "other".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let (_dir, service) = service().await;
        let mut settings = BTreeMap::new();
        settings.insert("seo_title".to_string(), "Home".to_string());

        service
            .dispatch(AgentRequest::PutSettings { settings: settings.clone() })
            .await
            .unwrap();
        let reply = service
            .dispatch(AgentRequest::GetSettings { prefix: "seo".into() })
            .await
            .unwrap();
        assert_eq!(reply, AgentReply::Settings { settings });
    }
}
