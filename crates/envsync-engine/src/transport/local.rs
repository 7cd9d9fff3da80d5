//! # Local Transport
//!
//! For installations on the engine's own host: requests go straight to an
//! in-process [`AgentService`] and trees are copied through the archive
//! codec without touching the network.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use envsync_agent::archive::{self, UnpackMode};
use envsync_agent::AgentService;
use envsync_core::{
    AgentReply, AgentRequest, ApplyReport, FetchRequest, TransferPayload, TransportKind,
};

use crate::error::SyncResult;

use super::{check_reply, validate_remote_path, TransportStrategy, TreeDirection, TreeReport};

/// Installations served in-process, by base URL.
#[derive(Clone, Default)]
pub struct LocalSites {
    sites: HashMap<String, AgentService>,
}

impl LocalSites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `base_url` from `service` instead of over the network.
    pub fn with_site(mut self, base_url: &str, service: AgentService) -> Self {
        self.sites.insert(normalize(base_url), service);
        self
    }

    pub fn get(&self, base_url: &str) -> Option<AgentService> {
        self.sites.get(&normalize(base_url)).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

fn normalize(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// Transport bound to one in-process installation.
#[derive(Clone)]
pub struct LocalTransport {
    service: AgentService,
}

impl LocalTransport {
    pub fn new(service: AgentService) -> Self {
        LocalTransport { service }
    }
}

#[async_trait]
impl TransportStrategy for LocalTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }

    async fn execute(&self, request: AgentRequest) -> SyncResult<AgentReply> {
        check_reply(self.service.handle(request).await)
    }

    async fn sync_tree(
        &self,
        local: &Path,
        remote: &str,
        direction: TreeDirection,
    ) -> SyncResult<TreeReport> {
        let remote = self.service.site().root().join(validate_remote_path(remote)?);

        let (from, to) = match direction {
            TreeDirection::Upload => (local.to_path_buf(), remote),
            TreeDirection::Download => (remote, local.to_path_buf()),
        };
        let data = archive::pack_dir_blocking(from).await?;
        let files = archive::unpack_blocking(data, to, UnpackMode::Replace).await?;
        Ok(TreeReport { files })
    }

    async fn send_object(&self, payload: TransferPayload) -> SyncResult<ApplyReport> {
        Ok(self.service.import(payload).await?)
    }

    async fn fetch_object(&self, request: FetchRequest) -> SyncResult<TransferPayload> {
        Ok(self.service.export(&request).await?)
    }
}

#[cfg(test)]
mod tests {
    use envsync_agent::Site;
    use envsync_core::ComponentKind;

    use super::*;

    async fn site(dir: &Path) -> AgentService {
        AgentService::offline(Site::open(dir).await.unwrap())
    }

    #[tokio::test]
    async fn test_lookup_ignores_trailing_slash_and_case() {
        let dir = tempfile::tempdir().unwrap();
        let sites = LocalSites::new().with_site("https://Staging.test/", site(dir.path()).await);

        assert!(sites.get("https://staging.test").is_some());
        assert!(sites.get("https://prod.test").is_none());
    }

    #[tokio::test]
    async fn test_tree_round_trip_through_site_root() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new(site(dir.path()).await);

        let stage = tempfile::tempdir().unwrap();
        std::fs::write(stage.path().join("style.css"), "body {}").unwrap();

        let report = transport
            .sync_tree(stage.path(), "themes/dark", TreeDirection::Upload)
            .await
            .unwrap();
        assert_eq!(report.files, 1);
        assert!(dir.path().join("themes/dark/style.css").exists());

        let info = transport
            .describe_artifact(ComponentKind::Theme, "dark")
            .await
            .unwrap();
        assert!(info.installed);

        let back = tempfile::tempdir().unwrap();
        let dest = back.path().join("copy");
        transport
            .sync_tree(&dest, "themes/dark", TreeDirection::Download)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dest.join("style.css")).unwrap(), "body {}");
    }

    #[tokio::test]
    async fn test_escaping_paths_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new(site(dir.path()).await);
        let stage = tempfile::tempdir().unwrap();

        assert!(transport
            .sync_tree(stage.path(), "../outside", TreeDirection::Upload)
            .await
            .is_err());
    }
}
