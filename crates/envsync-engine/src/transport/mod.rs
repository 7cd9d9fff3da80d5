//! # Transport Strategies
//!
//! How the engine reaches an installation. Every strategy carries the same
//! typed agent protocol, so migrators never know which one they hold.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       TransportStrategy                                 │
//! │                                                                         │
//! │  execute(AgentRequest)            → AgentReply                          │
//! │  sync_tree(local, remote, dir)    → TreeReport                          │
//! │  send_object(TransferPayload)     → ApplyReport                         │
//! │  fetch_object(FetchRequest)       → TransferPayload                     │
//! │                                                                         │
//! │  ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────────┐    │
//! │  │ ShellTransport   │ │ ObjectTransport  │ │ LocalTransport       │    │
//! │  │ ssh + rsync      │ │ HTTPS + Basic    │ │ in-process agent     │    │
//! │  │ agent exec       │ │ /command /export │ │ same host, tests     │    │
//! │  │ rsync --delete   │ │ /import          │ │                      │    │
//! │  └──────────────────┘ └──────────────────┘ └──────────────────────┘    │
//! │                                                                         │
//! │  Selection (TransportSelector, once per environment per operation):   │
//! │    local site registered?     → Local                                  │
//! │    shell credential + probe?  → Shell                                  │
//! │    otherwise                  → Object                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! An agent `Error` reply never reaches the caller as `Ok`: `execute` turns it
//! into a [`SyncError`].

pub mod local;
pub mod object;
pub mod selector;
pub mod shell;

use std::collections::BTreeMap;
use std::path::{Component, Path};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use envsync_core::{
    AgentReply, AgentRequest, ApplyReport, ArtifactInfo, ComponentKind, FetchRequest, SiteStatus,
    TransferPayload, TransportKind,
};

use crate::error::{SyncError, SyncResult};

pub use local::{LocalSites, LocalTransport};
pub use object::ObjectTransport;
pub use selector::{DefaultTransportFactory, EnvironmentRole, TransportFactory, TransportSelector};
pub use shell::ShellTransport;

/// Which way a tree moves relative to the engine host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeDirection {
    /// Local tree replaces the remote tree.
    Upload,
    /// Remote tree replaces the local tree.
    Download,
}

/// What a tree transfer moved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeReport {
    /// Files written on the receiving side.
    pub files: usize,
}

/// One way of reaching an installation.
#[async_trait]
pub trait TransportStrategy: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Runs one agent request on the installation.
    async fn execute(&self, request: AgentRequest) -> SyncResult<AgentReply>;

    /// Mirrors a tree between `local` and `remote` (relative to the
    /// installation root), deleting extraneous files on the receiving side.
    async fn sync_tree(
        &self,
        local: &Path,
        remote: &str,
        direction: TreeDirection,
    ) -> SyncResult<TreeReport>;

    /// Ships one payload and applies it on the installation.
    async fn send_object(&self, payload: TransferPayload) -> SyncResult<ApplyReport>;

    /// Exports one component from the installation.
    async fn fetch_object(&self, request: FetchRequest) -> SyncResult<TransferPayload>;

    // =========================================================================
    // Typed agent calls
    // =========================================================================

    async fn status(&self) -> SyncResult<SiteStatus> {
        match self.execute(AgentRequest::Status).await? {
            AgentReply::Status(status) => Ok(status),
            other => Err(unexpected("Status", &other)),
        }
    }

    async fn describe_artifact(&self, kind: ComponentKind, name: &str) -> SyncResult<ArtifactInfo> {
        let request = AgentRequest::DescribeArtifact {
            kind,
            name: name.to_string(),
        };
        match self.execute(request).await? {
            AgentReply::Artifact(info) => Ok(info),
            other => Err(unexpected("Artifact", &other)),
        }
    }

    async fn install_from_registry(&self, kind: ComponentKind, name: &str) -> SyncResult<String> {
        let request = AgentRequest::InstallFromRegistry {
            kind,
            name: name.to_string(),
        };
        expect_done(self.execute(request).await?)
    }

    async fn activate(&self, kind: ComponentKind, name: &str) -> SyncResult<String> {
        let request = AgentRequest::Activate {
            kind,
            name: name.to_string(),
        };
        expect_done(self.execute(request).await?)
    }

    async fn get_settings(&self, prefix: &str) -> SyncResult<BTreeMap<String, String>> {
        let request = AgentRequest::GetSettings {
            prefix: prefix.to_string(),
        };
        match self.execute(request).await? {
            AgentReply::Settings { settings } => Ok(settings),
            other => Err(unexpected("Settings", &other)),
        }
    }

    async fn put_settings(&self, settings: BTreeMap<String, String>) -> SyncResult<String> {
        expect_done(self.execute(AgentRequest::PutSettings { settings }).await?)
    }

    async fn delete_rows(
        &self,
        table: &str,
        key_columns: Vec<String>,
        keys: Vec<Vec<String>>,
    ) -> SyncResult<ApplyReport> {
        let request = AgentRequest::DeleteRows {
            table: table.to_string(),
            key_columns,
            keys,
        };
        match self.execute(request).await? {
            AgentReply::Applied(report) => Ok(report),
            other => Err(unexpected("Applied", &other)),
        }
    }
}

// =============================================================================
// Reply helpers
// =============================================================================

/// Turns an agent `Error` reply into a [`SyncError`].
pub(crate) fn check_reply(reply: AgentReply) -> SyncResult<AgentReply> {
    match reply {
        AgentReply::Error { code, message } => Err(SyncError::from_reply(code, message)),
        reply => Ok(reply),
    }
}

pub(crate) fn unexpected(expected: &str, reply: &AgentReply) -> SyncError {
    SyncError::Component(format!(
        "agent answered {} where {} was expected",
        reply.type_name(),
        expected
    ))
}

fn expect_done(reply: AgentReply) -> SyncResult<String> {
    match reply {
        AgentReply::Done { message } => Ok(message),
        other => Err(unexpected("Done", &other)),
    }
}

/// Timeout class of a request.
pub(crate) fn is_bulk(request: &AgentRequest) -> bool {
    matches!(
        request,
        AgentRequest::Fetch(_) | AgentRequest::Apply(_) | AgentRequest::InstallFromRegistry { .. }
    )
}

// =============================================================================
// Remote tree paths
// =============================================================================

/// Root-relative path of an extension or theme directory.
pub fn artifact_tree(kind: ComponentKind, name: &str) -> SyncResult<String> {
    let dir = kind
        .artifact_dir()
        .ok_or_else(|| SyncError::InvalidRequest(format!("{} is not a directory tree", kind)))?;
    Ok(format!("{}/{}", dir, name))
}

/// Reverses [`artifact_tree`].
pub fn parse_artifact_tree(remote: &str) -> SyncResult<(ComponentKind, String)> {
    let remote = validate_remote_path(remote)?;
    let (dir, name) = remote
        .split_once('/')
        .ok_or_else(|| SyncError::InvalidRequest(format!("'{}' is not an artifact tree", remote)))?;

    let kind = [ComponentKind::Extension, ComponentKind::Theme]
        .into_iter()
        .find(|kind| kind.artifact_dir() == Some(dir))
        .ok_or_else(|| SyncError::InvalidRequest(format!("'{}' is not an artifact tree", remote)))?;

    if name.is_empty() || name.contains('/') {
        return Err(SyncError::InvalidRequest(format!(
            "'{}' is not an artifact tree",
            remote
        )));
    }
    Ok((kind, name.to_string()))
}

/// Rejects absolute paths and `..` so a remote path stays under the root.
pub fn validate_remote_path(remote: &str) -> SyncResult<&str> {
    let trimmed = remote.trim_matches('/');
    let path = Path::new(trimmed);
    let escapes = remote.starts_with('/')
        || trimmed.is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(SyncError::InvalidRequest(format!(
            "remote path '{}' must be relative to the installation root",
            remote
        )));
    }
    Ok(trimmed)
}
