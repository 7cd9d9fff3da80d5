//! # Agent Configuration
//!
//! ## Configuration Sources
//! ```text
//! 1. Environment Variables (highest priority)
//!    ENVSYNC_AGENT_ROOT, ENVSYNC_AGENT_BIND_ADDR, ENVSYNC_REGISTRY_URL
//! 2. TOML file passed with --config
//! 3. Command line flags / defaults (lowest priority)
//! ```
//!
//! ## File Format
//! ```toml
//! root = "/srv/site"
//! bind_addr = "0.0.0.0:8790"
//! agent_path = "/agent/v1"
//! registry_url = "https://registry.example.org"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use envsync_core::DEFAULT_AGENT_PATH;

use crate::error::{AgentError, AgentResult};
use crate::site::SITE_DB_FILE;

/// Remote Agent settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Installation root.
    pub root: PathBuf,

    /// Site database; defaults to `<root>/site.db`.
    #[serde(default)]
    pub database: Option<PathBuf>,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Path prefix of the HTTP surface.
    #[serde(default = "default_agent_path")]
    pub agent_path: String,

    /// Public registry used by InstallFromRegistry.
    #[serde(default)]
    pub registry_url: Option<String>,

    /// Largest accepted request body (archives travel inline).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Registry request timeout.
    #[serde(default = "default_registry_timeout")]
    pub registry_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8790".to_string()
}

fn default_agent_path() -> String {
    DEFAULT_AGENT_PATH.to_string()
}

fn default_max_body_bytes() -> usize {
    256 * 1024 * 1024
}

fn default_registry_timeout() -> u64 {
    60
}

impl AgentConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        AgentConfig {
            root: root.into(),
            database: None,
            bind_addr: default_bind_addr(),
            agent_path: default_agent_path(),
            registry_url: None,
            max_body_bytes: default_max_body_bytes(),
            registry_timeout_secs: default_registry_timeout(),
        }
    }

    /// Loads a TOML file, then applies environment overrides and validates.
    pub fn load(path: &Path) -> AgentResult<Self> {
        info!(?path, "Loading agent config from file");
        let contents = std::fs::read_to_string(path)?;
        let mut config: AgentConfig = toml::from_str(&contents)
            .map_err(|e| AgentError::InvalidRequest(format!("invalid agent config: {}", e)))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("ENVSYNC_AGENT_ROOT") {
            debug!(root = %root, "Overriding agent root from environment");
            self.root = PathBuf::from(root);
        }
        if let Ok(addr) = std::env::var("ENVSYNC_AGENT_BIND_ADDR") {
            debug!(addr = %addr, "Overriding agent bind address from environment");
            self.bind_addr = addr;
        }
        if let Ok(url) = std::env::var("ENVSYNC_REGISTRY_URL") {
            self.registry_url = Some(url);
        }
    }

    pub fn validate(&self) -> AgentResult<()> {
        if self.root.as_os_str().is_empty() {
            return Err(AgentError::InvalidRequest("agent root is not set".into()));
        }
        if !self.agent_path.starts_with('/') {
            return Err(AgentError::InvalidRequest(format!(
                "agent_path must start with '/', got '{}'",
                self.agent_path
            )));
        }
        if let Some(url) = &self.registry_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(AgentError::InvalidRequest(format!(
                    "registry_url must be http(s), got '{}'",
                    url
                )));
            }
        }
        if self.max_body_bytes == 0 {
            return Err(AgentError::InvalidRequest(
                "max_body_bytes must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.root.join(SITE_DB_FILE))
    }
}
