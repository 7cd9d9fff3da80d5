//! # Public Registry
//!
//! Where repository-available extensions and themes come from.
//!
//! ```text
//! GET {base}/extensions/{name}.json  ──► 200 RegistryEntry  (available)
//!                                    ──► 404                (custom artifact)
//! GET entry.download_url             ──► gz tar of the artifact tree
//! ```
//!
//! A registry that cannot be reached is treated as not having the artifact,
//! so callers fall back to shipping the artifact themselves.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use envsync_core::ComponentKind;

use crate::error::{AgentError, AgentResult};

/// One artifact published in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub kind: ComponentKind,
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub download_url: String,
}

/// Source of repository-available artifacts.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Returns the entry when the registry publishes `name`.
    async fn lookup(&self, kind: ComponentKind, name: &str) -> AgentResult<Option<RegistryEntry>>;

    /// Downloads the artifact archive of an entry.
    async fn download(&self, entry: &RegistryEntry) -> AgentResult<Vec<u8>>;
}

// =============================================================================
// HTTP Registry
// =============================================================================

/// Registry reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRegistry {
    pub fn new(base_url: &str, timeout: Duration) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Registry(e.to_string()))?;
        Ok(HttpRegistry {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn entry_url(&self, dir: &str, name: &str) -> String {
        format!("{}/{}/{}.json", self.base_url, dir, name)
    }
}

#[async_trait]
impl RegistryClient for HttpRegistry {
    async fn lookup(&self, kind: ComponentKind, name: &str) -> AgentResult<Option<RegistryEntry>> {
        let Some(dir) = kind.artifact_dir() else {
            return Ok(None);
        };
        let url = self.entry_url(dir, name);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "Registry unreachable, treating as not listed");
                return Ok(None);
            }
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(kind = %kind, name = %name, "Not in registry");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AgentError::Registry(format!(
                "lookup of {} returned {}",
                url,
                response.status()
            )));
        }

        let entry = response
            .json::<RegistryEntry>()
            .await
            .map_err(|e| AgentError::Registry(format!("bad entry at {}: {}", url, e)))?;
        Ok(Some(entry))
    }

    async fn download(&self, entry: &RegistryEntry) -> AgentResult<Vec<u8>> {
        let response = self
            .client
            .get(&entry.download_url)
            .send()
            .await
            .map_err(|e| AgentError::Registry(format!("download failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AgentError::Registry(format!(
                "download of {} returned {}",
                entry.name,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AgentError::Registry(format!("download failed: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

// =============================================================================
// Offline Registries
// =============================================================================

/// A registry that publishes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRegistry;

#[async_trait]
impl RegistryClient for NoRegistry {
    async fn lookup(&self, _kind: ComponentKind, _name: &str) -> AgentResult<Option<RegistryEntry>> {
        Ok(None)
    }

    async fn download(&self, entry: &RegistryEntry) -> AgentResult<Vec<u8>> {
        Err(AgentError::Registry(format!("{} is not published", entry.name)))
    }
}

/// In-memory registry, for installations without network access and tests.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    archives: RwLock<HashMap<(ComponentKind, String), Vec<u8>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an artifact archive.
    pub fn publish(&self, kind: ComponentKind, name: &str, archive: Vec<u8>) {
        if let Ok(mut archives) = self.archives.write() {
            archives.insert((kind, name.to_string()), archive);
        }
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn lookup(&self, kind: ComponentKind, name: &str) -> AgentResult<Option<RegistryEntry>> {
        let archives = self
            .archives
            .read()
            .map_err(|_| AgentError::Internal("registry lock poisoned".into()))?;
        Ok(archives
            .contains_key(&(kind, name.to_string()))
            .then(|| RegistryEntry {
                kind,
                name: name.to_string(),
                version: "memory".to_string(),
                download_url: format!("memory://{}/{}", kind, name),
            }))
    }

    async fn download(&self, entry: &RegistryEntry) -> AgentResult<Vec<u8>> {
        let archives = self
            .archives
            .read()
            .map_err(|_| AgentError::Internal("registry lock poisoned".into()))?;
        archives
            .get(&(entry.kind, entry.name.clone()))
            .cloned()
            .ok_or_else(|| AgentError::Registry(format!("{} is not published", entry.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_registry() {
        let registry = MemoryRegistry::new();
        registry.publish(ComponentKind::Theme, "twenty", vec![1, 2, 3]);

        let entry = registry
            .lookup(ComponentKind::Theme, "twenty")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(registry.download(&entry).await.unwrap(), vec![1, 2, 3]);
        assert!(registry
            .lookup(ComponentKind::Extension, "twenty")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unreachable_registry_counts_as_unlisted() {
        let registry = HttpRegistry::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let entry = registry.lookup(ComponentKind::Extension, "seo").await.unwrap();
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn test_tables_are_never_listed() {
        let registry = HttpRegistry::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        assert!(registry.lookup(ComponentKind::Table, "posts").await.unwrap().is_none());
    }

    #[test]
    fn test_entry_url() {
        let registry = HttpRegistry::new("https://registry.test/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            registry.entry_url("themes", "twenty"),
            "https://registry.test/themes/twenty.json"
        );
    }
}
