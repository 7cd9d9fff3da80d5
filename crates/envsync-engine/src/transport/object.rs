//! # Object Transport
//!
//! Reaches an installation through the Remote Agent's HTTP surface,
//! authenticated with the environment's owner credential (HTTP Basic,
//! username plus application token).
//!
//! ```text
//! POST {base_url}{agent_path}/command   AgentRequest    → AgentReply
//! POST {base_url}{agent_path}/export    FetchRequest    → TransferPayload
//! POST {base_url}{agent_path}/import    TransferPayload → ApplyReport
//! ```
//!
//! Directory trees travel as archive payloads: upload packs the local tree
//! and imports it, download exports and unpacks over the local tree.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use envsync_agent::archive::{self, UnpackMode};
use envsync_core::{
    AgentReply, AgentRequest, ApplyReport, Environment, FetchRequest, PayloadBody,
    TransferPayload, TransportKind,
};

use crate::config::TransportSettings;
use crate::error::{SyncError, SyncResult};

use super::{check_reply, is_bulk, parse_artifact_tree, TransportStrategy, TreeDirection, TreeReport};

/// Transport over the agent's HTTP API.
#[derive(Debug, Clone)]
pub struct ObjectTransport {
    endpoint: String,
    username: String,
    token: String,
    client: Client,
    settings: TransportSettings,
}

impl ObjectTransport {
    /// Creates a transport for `environment`. Fails on an unusable base URL.
    pub fn new(environment: &Environment, settings: TransportSettings) -> SyncResult<Self> {
        let base = environment.base_url.trim();
        if base.is_empty() {
            return Err(SyncError::InvalidUrl(format!(
                "environment '{}' has no base URL",
                environment.label()
            )));
        }

        let url = Url::parse(base)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "unsupported scheme '{}' in {}",
                url.scheme(),
                base
            )));
        }

        let client = Client::builder()
            .connect_timeout(settings.control_timeout())
            .build()
            .map_err(|e| SyncError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(ObjectTransport {
            endpoint: format!("{}{}", base.trim_end_matches('/'), environment.agent_path()),
            username: environment.owner.username.clone(),
            token: environment.owner.token.clone(),
            client,
            settings,
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.endpoint, route)
    }

    fn post<B: Serialize>(&self, route: &str, body: &B, timeout: Duration) -> RequestBuilder {
        self.client
            .post(self.url(route))
            .basic_auth(&self.username, Some(&self.token))
            .timeout(timeout)
            .json(body)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, timeout: Duration) -> SyncResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| self.request_error(e, timeout))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| self.request_error(e, timeout));
        }
        Err(self.status_error(status, response).await)
    }

    /// Maps a non-success response, preferring the agent's own error reply.
    async fn status_error(&self, status: StatusCode, response: Response) -> SyncError {
        let body = response.text().await.unwrap_or_default();
        if let Ok(AgentReply::Error { code, message }) = serde_json::from_str::<AgentReply>(&body) {
            return SyncError::from_reply(code, message);
        }

        match status {
            StatusCode::UNAUTHORIZED => {
                SyncError::AuthenticationFailed(format!("{} rejected the owner credential", self.endpoint))
            }
            StatusCode::FORBIDDEN => {
                SyncError::PermissionDenied(format!("{} refused user '{}'", self.endpoint, self.username))
            }
            StatusCode::NOT_FOUND => {
                SyncError::ConnectionFailed(format!("no agent answers at {}", self.endpoint))
            }
            status => SyncError::Component(format!("agent returned {}: {}", status, body.trim())),
        }
    }

    fn request_error(&self, err: reqwest::Error, timeout: Duration) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(timeout.as_secs())
        } else if err.is_decode() {
            SyncError::SerializationFailed(format!("bad reply from {}: {}", self.endpoint, err))
        } else {
            SyncError::ConnectionFailed(format!("{}: {}", self.endpoint, err))
        }
    }
}

#[async_trait]
impl TransportStrategy for ObjectTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Object
    }

    async fn execute(&self, request: AgentRequest) -> SyncResult<AgentReply> {
        let timeout = if is_bulk(&request) {
            self.settings.bulk_timeout()
        } else {
            self.settings.control_timeout()
        };
        debug!(endpoint = %self.endpoint, request = request.type_name(), "Object agent request");

        let builder = self.post("command", &request, timeout);
        let reply: AgentReply = self.send(builder, timeout).await?;
        check_reply(reply)
    }

    async fn sync_tree(
        &self,
        local: &Path,
        remote: &str,
        direction: TreeDirection,
    ) -> SyncResult<TreeReport> {
        let (kind, name) = parse_artifact_tree(remote)?;

        match direction {
            TreeDirection::Upload => {
                let data = archive::pack_dir_blocking(local.to_path_buf()).await?;
                let report = self
                    .send_object(TransferPayload::archive(kind, &name, data))
                    .await?;
                Ok(TreeReport { files: report.files })
            }
            TreeDirection::Download => {
                let payload = self.fetch_object(FetchRequest::new(kind, &name)).await?;
                let PayloadBody::Archive { data } = payload.body else {
                    return Err(SyncError::Component(format!(
                        "{} {} was not exported as an archive",
                        kind, name
                    )));
                };
                let files =
                    archive::unpack_blocking(data, local.to_path_buf(), UnpackMode::Replace).await?;
                Ok(TreeReport { files })
            }
        }
    }

    async fn send_object(&self, payload: TransferPayload) -> SyncResult<ApplyReport> {
        let timeout = self.settings.bulk_timeout();
        debug!(
            endpoint = %self.endpoint,
            kind = %payload.kind,
            name = %payload.name,
            bytes = payload.binary_len(),
            "Uploading payload"
        );
        let builder = self.post("import", &payload, timeout);
        self.send(builder, timeout).await
    }

    async fn fetch_object(&self, request: FetchRequest) -> SyncResult<TransferPayload> {
        let timeout = self.settings.bulk_timeout();
        let builder = self.post("export", &request, timeout);
        self.send(builder, timeout).await
    }
}
