//! # Domain Types
//!
//! Environments, credentials and component selection.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │   Environment   │   │ ShellCredential │   │ ComponentSelection  │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────────  │   │
//! │  │  name           │   │  host, port     │   │  extensions: set    │   │
//! │  │  base_url       │──►│  user           │   │  themes: set        │   │
//! │  │  owner          │   │  auth           │   │  tables: set        │   │
//! │  │  shell?         │   │  root_path      │   │  media: bool        │   │
//! │  │  database?      │   └─────────────────┘   └─────────────────────┘   │
//! │  │  agent_path?    │                                                    │
//! │  └─────────────────┘   ┌─────────────────┐   ┌─────────────────────┐   │
//! │                        │    Direction    │   │   ComponentKind     │   │
//! │                        │  Push | Pull    │   │  Extension, Theme   │   │
//! │                        └─────────────────┘   │  Table, Media       │   │
//! │                                              └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Environments are read-only to the engine and supplied whole with every
//! request. Secrets never show up in `Debug` output.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::DEFAULT_AGENT_PATH;

const REDACTED: &str = "<redacted>";

// =============================================================================
// Credentials
// =============================================================================

/// Owner-level credential used for every Remote Agent HTTP call.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OwnerCredential {
    pub username: String,
    /// Long-lived application token.
    pub token: String,
}

impl fmt::Debug for OwnerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerCredential")
            .field("username", &self.username)
            .field("token", &REDACTED)
            .finish()
    }
}

/// How the shell session authenticates.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ShellAuth {
    Password { password: String },
    KeyFile { path: PathBuf },
}

impl fmt::Debug for ShellAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellAuth::Password { .. } => f.write_str("Password(<redacted>)"),
            ShellAuth::KeyFile { path } => f.debug_tuple("KeyFile").field(path).finish(),
        }
    }
}

/// Shell access to an installation host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShellCredential {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    pub auth: ShellAuth,
    /// Installation root on the remote host.
    pub root_path: String,
}

fn default_ssh_port() -> u16 {
    22
}

/// Direct database access to an installation.
///
/// Carried for completeness of the environment descriptor; the engine reaches
/// site databases through the Remote Agent.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseCredential {
    pub host: String,
    pub user: String,
    pub password: String,
    pub schema: String,
}

impl fmt::Debug for DatabaseCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredential")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &REDACTED)
            .field("schema", &self.schema)
            .finish()
    }
}

// =============================================================================
// Environment
// =============================================================================

/// One managed installation acting as sync source or target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    /// Display name (e.g. "staging").
    #[serde(default)]
    pub name: String,
    pub base_url: String,
    pub owner: OwnerCredential,
    #[serde(default)]
    pub shell: Option<ShellCredential>,
    #[serde(default)]
    pub database: Option<DatabaseCredential>,
    /// Overrides [`DEFAULT_AGENT_PATH`].
    #[serde(default)]
    pub agent_path: Option<String>,
}

impl Environment {
    /// Creates an environment with only the HTTP credential.
    pub fn new(name: &str, base_url: &str, username: &str, token: &str) -> Self {
        Environment {
            name: name.to_string(),
            base_url: base_url.to_string(),
            owner: OwnerCredential {
                username: username.to_string(),
                token: token.to_string(),
            },
            shell: None,
            database: None,
            agent_path: None,
        }
    }

    /// Attaches a shell credential.
    pub fn with_shell(mut self, shell: ShellCredential) -> Self {
        self.shell = Some(shell);
        self
    }

    /// Returns the agent path, always starting with `/` and without a trailing `/`.
    pub fn agent_path(&self) -> String {
        let raw = self
            .agent_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_AGENT_PATH);
        let trimmed = raw.trim().trim_end_matches('/');
        if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        }
    }

    /// Returns the name, falling back to the base URL.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.base_url
        } else {
            &self.name
        }
    }
}

// =============================================================================
// Direction
// =============================================================================

/// Which way an operation moves data.
///
/// `Push` copies from source to target; `Pull` copies from target back to
/// source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Push,
    Pull,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Push => "push",
            Direction::Pull => "pull",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "push" => Ok(Direction::Push),
            "pull" => Ok(Direction::Pull),
            _ => Err(ValidationError::NotAllowed {
                field: "direction".to_string(),
                allowed: vec!["push".to_string(), "pull".to_string()],
            }),
        }
    }
}

// =============================================================================
// Component Kind
// =============================================================================

/// One migratable kind.
///
/// The declaration order is the fixed execution order of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Extension,
    Theme,
    Table,
    Media,
}

impl ComponentKind {
    /// All kinds in execution order.
    pub const ORDER: [ComponentKind; 4] = [
        ComponentKind::Extension,
        ComponentKind::Theme,
        ComponentKind::Table,
        ComponentKind::Media,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Extension => "extension",
            ComponentKind::Theme => "theme",
            ComponentKind::Table => "table",
            ComponentKind::Media => "media",
        }
    }

    /// Directory under the installation root holding artifacts of this kind.
    pub fn artifact_dir(&self) -> Option<&'static str> {
        match self {
            ComponentKind::Extension => Some("extensions"),
            ComponentKind::Theme => Some("themes"),
            ComponentKind::Table | ComponentKind::Media => None,
        }
    }

    /// Extensions and themes are directory trees on disk.
    pub fn is_artifact(&self) -> bool {
        self.artifact_dir().is_some()
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Transport Kind
// =============================================================================

/// The mechanism that moved an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Remote command execution plus rsync over ssh.
    Shell,
    /// Archive-and-ship over authenticated HTTP.
    Object,
    /// Same-host installation, no network hop.
    Local,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Shell => "shell",
            TransportKind::Object => "object",
            TransportKind::Local => "local",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Component Selection
// =============================================================================

/// What one operation migrates.
///
/// Names are the stable identifiers reported by the installation and are
/// treated as opaque keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSelection {
    #[serde(default)]
    pub extensions: BTreeSet<String>,
    #[serde(default)]
    pub themes: BTreeSet<String>,
    #[serde(default)]
    pub tables: BTreeSet<String>,
    #[serde(default)]
    pub media: bool,
}

impl ComponentSelection {
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty() && self.themes.is_empty() && self.tables.is_empty() && !self.media
    }

    /// Selected names for one kind, in a stable order.
    pub fn names(&self, kind: ComponentKind) -> Vec<String> {
        match kind {
            ComponentKind::Extension => self.extensions.iter().cloned().collect(),
            ComponentKind::Theme => self.themes.iter().cloned().collect(),
            ComponentKind::Table => self.tables.iter().cloned().collect(),
            ComponentKind::Media if self.media => vec![crate::MEDIA_ITEM_NAME.to_string()],
            ComponentKind::Media => Vec::new(),
        }
    }

    /// Total number of items across all kinds.
    pub fn item_count(&self) -> usize {
        ComponentKind::ORDER
            .iter()
            .map(|kind| self.names(*kind).len())
            .sum()
    }

    pub fn with_extension(mut self, name: &str) -> Self {
        self.extensions.insert(name.to_string());
        self
    }

    pub fn with_theme(mut self, name: &str) -> Self {
        self.themes.insert(name.to_string());
        self
    }

    pub fn with_table(mut self, name: &str) -> Self {
        self.tables.insert(name.to_string());
        self
    }

    pub fn with_media(mut self) -> Self {
        self.media = true;
        self
    }
}
