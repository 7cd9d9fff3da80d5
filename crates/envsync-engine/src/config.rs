//! # Engine Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     ENVSYNC_BIND_ADDR=0.0.0.0:8780                                     │
//! │     ENVSYNC_DATABASE=/var/lib/envsync/envsync.db                       │
//! │     ENVSYNC_CONTROL_TIMEOUT_SECS / ENVSYNC_BULK_TIMEOUT_SECS           │
//! │     ENVSYNC_REGISTRY_URL / ENVSYNC_AGENT_COMMAND                       │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     --config <path>, or                                                │
//! │     ~/.config/envsync/envsync.toml (Linux)                             │
//! │     ~/Library/Application Support/org.envsync.envsync/envsync.toml     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [server]
//! bind_addr = "127.0.0.1:8780"
//!
//! [store]
//! database = "/var/lib/envsync/envsync.db"
//!
//! [transport]
//! control_timeout_secs = 30
//! bulk_timeout_secs = 600
//! agent_command = "envsync agent exec"
//!
//! [registry]
//! url = "https://registry.example.org"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Server Settings
// =============================================================================

/// Control API listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8780".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: default_bind_addr(),
        }
    }
}

// =============================================================================
// Store Settings
// =============================================================================

/// Where SyncOperation records live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

fn default_database() -> PathBuf {
    directories::ProjectDirs::from("org", "envsync", "envsync")
        .map(|dirs| dirs.data_dir().join("envsync.db"))
        .unwrap_or_else(|| PathBuf::from("envsync.db"))
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            database: default_database(),
        }
    }
}

// =============================================================================
// Transport Settings
// =============================================================================

/// Timeouts and external programs used by the transports.
///
/// ## Timeouts
/// ```text
/// control  ── status, describe, activate, settings, probes (tens of seconds)
/// bulk     ── archive/table/media export and import      (minutes)
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSettings {
    #[serde(default = "default_control_timeout")]
    pub control_timeout_secs: u64,

    #[serde(default = "default_bulk_timeout")]
    pub bulk_timeout_secs: u64,

    /// First delay between reachability probes.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Remote command that runs the agent's stdin/stdout surface.
    #[serde(default = "default_agent_command")]
    pub agent_command: String,

    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,

    #[serde(default = "default_rsync_program")]
    pub rsync_program: String,

    /// Used for password-based shell credentials.
    #[serde(default = "default_sshpass_program")]
    pub sshpass_program: String,
}

fn default_control_timeout() -> u64 {
    30
}

fn default_bulk_timeout() -> u64 {
    600
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_agent_command() -> String {
    "envsync agent exec".to_string()
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_rsync_program() -> String {
    "rsync".to_string()
}

fn default_sshpass_program() -> String {
    "sshpass".to_string()
}

impl Default for TransportSettings {
    fn default() -> Self {
        TransportSettings {
            control_timeout_secs: default_control_timeout(),
            bulk_timeout_secs: default_bulk_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            agent_command: default_agent_command(),
            ssh_program: default_ssh_program(),
            rsync_program: default_rsync_program(),
            sshpass_program: default_sshpass_program(),
        }
    }
}

impl TransportSettings {
    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_secs)
    }

    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

// =============================================================================
// Registry Settings
// =============================================================================

/// Public extension/theme registry consulted on push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// No registry is consulted when unset; every artifact ships as custom.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u64,
}

fn default_registry_timeout() -> u64 {
    60
}

impl Default for RegistrySettings {
    fn default() -> Self {
        RegistrySettings {
            url: None,
            timeout_secs: default_registry_timeout(),
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub transport: TransportSettings,

    #[serde(default)]
    pub registry: RegistrySettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (`envsync.toml`)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| SyncError::ConfigLoadFailed(e.to_string()))?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.server.bind_addr.trim().is_empty() {
            return Err(SyncError::InvalidConfig("server.bind_addr is empty".into()));
        }

        if self.transport.control_timeout_secs == 0 || self.transport.bulk_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "transport timeouts must be greater than 0".into(),
            ));
        }

        if self.transport.agent_command.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "transport.agent_command is empty".into(),
            ));
        }

        if let Some(ref url) = self.registry.url {
            url::Url::parse(url)
                .map_err(|e| SyncError::InvalidUrl(format!("registry url '{}': {}", url, e)))?;
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("ENVSYNC_BIND_ADDR") {
            debug!(addr = %addr, "Overriding bind address from environment");
            self.server.bind_addr = addr;
        }

        if let Ok(path) = std::env::var("ENVSYNC_DATABASE") {
            debug!(path = %path, "Overriding database path from environment");
            self.store.database = PathBuf::from(path);
        }

        if let Ok(secs) = std::env::var("ENVSYNC_CONTROL_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.transport.control_timeout_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid ENVSYNC_CONTROL_TIMEOUT_SECS"),
            }
        }

        if let Ok(secs) = std::env::var("ENVSYNC_BULK_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.transport.bulk_timeout_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid ENVSYNC_BULK_TIMEOUT_SECS"),
            }
        }

        if let Ok(url) = std::env::var("ENVSYNC_REGISTRY_URL") {
            debug!(url = %url, "Overriding registry URL from environment");
            self.registry.url = Some(url);
        }

        if let Ok(command) = std::env::var("ENVSYNC_AGENT_COMMAND") {
            self.transport.agent_command = command;
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "envsync", "envsync")
            .map(|dirs| dirs.config_dir().join("envsync.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.server.bind_addr, "127.0.0.1:8780");
        assert_eq!(config.transport.control_timeout(), Duration::from_secs(30));
        assert_eq!(config.transport.bulk_timeout(), Duration::from_secs(600));
        assert!(config.registry.url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let config: EngineConfig = toml::from_str(
            r#"
            [transport]
            control_timeout_secs = 5

            [registry]
            url = "https://registry.test"
            "#,
        )
        .unwrap();

        assert_eq!(config.transport.control_timeout_secs, 5);
        assert_eq!(config.transport.bulk_timeout_secs, 600);
        assert_eq!(config.transport.agent_command, "envsync agent exec");
        assert_eq!(config.registry.url.as_deref(), Some("https://registry.test"));
    }

    #[test]
    fn test_validation() {
        let mut config = EngineConfig::default();
        config.transport.control_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.registry.url = Some("not a url".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envsync.toml");

        let mut config = EngineConfig::default();
        config.server.bind_addr = "0.0.0.0:9000".into();
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[server]"));
        let loaded: EngineConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.server.bind_addr, "0.0.0.0:9000");
    }
}
