//! # Remote Agent Protocol
//!
//! Messages exchanged between the engine and the Remote Agent of an
//! installation. The same messages travel over every transport:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      One protocol, three carriers                       │
//! │                                                                         │
//! │  Object Transport   POST {agent}/command   body: AgentRequest (JSON)   │
//! │                     ◄────────────────────  body: AgentReply  (JSON)    │
//! │                                                                         │
//! │  Shell Transport    ssh host 'envsync agent exec --root R'             │
//! │                     stdin:  AgentRequest   stdout: AgentReply          │
//! │                                                                         │
//! │  Local Transport    AgentService::dispatch(AgentRequest) in-process    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Adjacently tagged JSON:
//! ```json
//! { "type": "Activate", "payload": { "kind": "extension", "name": "seo" } }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::payload::{ApplyReport, FetchRequest, TransferPayload};
use crate::types::ComponentKind;

// =============================================================================
// Requests
// =============================================================================

/// Everything the orchestrator can ask of an installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AgentRequest {
    /// Inventory and liveness.
    Status,

    /// Installed/active state of one extension or theme.
    DescribeArtifact { kind: ComponentKind, name: String },

    /// Download from the public registry and install.
    InstallFromRegistry { kind: ComponentKind, name: String },

    /// Activate an installed extension or theme.
    Activate { kind: ComponentKind, name: String },

    /// Settings whose keys start with `prefix`.
    GetSettings { prefix: String },

    /// Overwrites the given settings.
    PutSettings { settings: BTreeMap<String, String> },

    /// Export one component.
    Fetch(FetchRequest),

    /// Import one component.
    Apply(TransferPayload),

    /// Delete rows identified by key literals.
    #[serde(rename_all = "camelCase")]
    DeleteRows {
        table: String,
        key_columns: Vec<String>,
        keys: Vec<Vec<String>>,
    },
}

impl AgentRequest {
    /// Returns the request type name (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            AgentRequest::Status => "Status",
            AgentRequest::DescribeArtifact { .. } => "DescribeArtifact",
            AgentRequest::InstallFromRegistry { .. } => "InstallFromRegistry",
            AgentRequest::Activate { .. } => "Activate",
            AgentRequest::GetSettings { .. } => "GetSettings",
            AgentRequest::PutSettings { .. } => "PutSettings",
            AgentRequest::Fetch(_) => "Fetch",
            AgentRequest::Apply(_) => "Apply",
            AgentRequest::DeleteRows { .. } => "DeleteRows",
        }
    }
}

// =============================================================================
// Replies
// =============================================================================

/// What an installation answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AgentReply {
    Status(SiteStatus),
    Artifact(ArtifactInfo),
    Settings { settings: BTreeMap<String, String> },
    Payload(TransferPayload),
    Applied(ApplyReport),
    Done { message: String },
    Error { code: ErrorCode, message: String },
}

impl AgentReply {
    pub fn type_name(&self) -> &'static str {
        match self {
            AgentReply::Status(_) => "Status",
            AgentReply::Artifact(_) => "Artifact",
            AgentReply::Settings { .. } => "Settings",
            AgentReply::Payload(_) => "Payload",
            AgentReply::Applied(_) => "Applied",
            AgentReply::Done { .. } => "Done",
            AgentReply::Error { .. } => "Error",
        }
    }

    pub fn done(message: impl Into<String>) -> Self {
        AgentReply::Done {
            message: message.into(),
        }
    }
}

/// Installation inventory, used to populate selections and as the
/// reachability probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatus {
    pub extensions: Vec<String>,
    pub themes: Vec<String>,
    pub tables: Vec<String>,
    pub media_count: u64,
    pub agent_version: String,
}

/// State of one extension or theme on an installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    pub kind: ComponentKind,
    pub name: String,
    pub installed: bool,
    pub active: bool,
}

/// Machine-readable error category carried by [`AgentReply::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No or wrong credential.
    Unauthenticated,
    /// Credential valid but role too low.
    Forbidden,
    NotFound,
    InvalidRequest,
    /// The request was understood but could not be carried out.
    Failed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NotFound => "not_found",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request = AgentRequest::Activate {
            kind: ComponentKind::Extension,
            name: "seo".into(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "Activate");
        assert_eq!(json["payload"]["kind"], "extension");
        assert_eq!(json["payload"]["name"], "seo");
    }

    #[test]
    fn test_unit_request_round_trip() {
        let json = serde_json::to_string(&AgentRequest::Status).unwrap();
        assert_eq!(json, r#"{"type":"Status"}"#);
        let back: AgentRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.type_name(), "Status");
    }

    #[test]
    fn test_delete_rows_uses_camel_case() {
        let request = AgentRequest::DeleteRows {
            table: "posts".into(),
            key_columns: vec!["id".into()],
            keys: vec![vec!["3".into()]],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["payload"]["keyColumns"][0], "id");
    }

    #[test]
    fn test_error_reply() {
        let json = r#"{"type":"Error","payload":{"code":"forbidden","message":"editors cannot sync"}}"#;
        let reply: AgentReply = serde_json::from_str(json).unwrap();
        match reply {
            AgentReply::Error { code, .. } => assert_eq!(code, ErrorCode::Forbidden),
            other => panic!("unexpected reply: {:?}", other),
        }
    }
}
