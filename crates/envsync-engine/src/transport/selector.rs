//! # Transport Selection
//!
//! Picks the strategy for an environment once per operation.
//!
//! ```text
//! Environment
//!     │
//!     ├── base URL served in-process? ──────────────► Local
//!     │
//!     ├── shell credential? ── probe (ssh ... true) ─┬─ ok ──► Shell
//!     │                                              └─ err ─┐
//!     │                                                      ▼
//!     └──────────────────────────────────────────────────► Object
//! ```
//!
//! A shell credential that fails to open a session (unreachable host or a
//! rejected password or key) is logged and the Object
//! Transport is used instead. Once chosen, the strategy stays fixed for the
//! rest of the operation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use envsync_core::Environment;

use crate::config::TransportSettings;
use crate::error::SyncResult;

use super::{LocalSites, LocalTransport, ObjectTransport, ShellTransport, TransportStrategy};

/// Which side of an operation an environment plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvironmentRole {
    Source,
    Target,
}

/// Builds the transport for an environment.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn select(&self, environment: &Environment) -> SyncResult<Arc<dyn TransportStrategy>>;
}

/// Local, then Shell, then Object.
#[derive(Clone)]
pub struct DefaultTransportFactory {
    settings: TransportSettings,
    local: LocalSites,
}

impl DefaultTransportFactory {
    pub fn new(settings: TransportSettings) -> Self {
        DefaultTransportFactory {
            settings,
            local: LocalSites::new(),
        }
    }

    pub fn with_local(mut self, local: LocalSites) -> Self {
        self.local = local;
        self
    }
}

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn select(&self, environment: &Environment) -> SyncResult<Arc<dyn TransportStrategy>> {
        let label = environment.label();

        if let Some(service) = self.local.get(&environment.base_url) {
            debug!(environment = %label, "Using local transport");
            return Ok(Arc::new(LocalTransport::new(service)));
        }

        if let Some(credential) = &environment.shell {
            let shell = ShellTransport::new(credential.clone(), self.settings.clone());
            if shell.is_available().await {
                info!(environment = %label, host = %credential.host, "Using shell transport");
                return Ok(Arc::new(shell));
            }
            warn!(
                environment = %label,
                host = %credential.host,
                "Shell session unavailable, falling back to object transport"
            );
        }

        let object = ObjectTransport::new(environment, self.settings.clone())?;
        info!(environment = %label, "Using object transport");
        Ok(Arc::new(object))
    }
}

/// Per-operation memo of chosen strategies.
pub struct TransportSelector {
    factory: Arc<dyn TransportFactory>,
    chosen: Mutex<HashMap<EnvironmentRole, Arc<dyn TransportStrategy>>>,
}

impl TransportSelector {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        TransportSelector {
            factory,
            chosen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the strategy for `role`, selecting it on first use.
    pub async fn get(
        &self,
        role: EnvironmentRole,
        environment: &Environment,
    ) -> SyncResult<Arc<dyn TransportStrategy>> {
        let mut chosen = self.chosen.lock().await;
        if let Some(transport) = chosen.get(&role) {
            return Ok(Arc::clone(transport));
        }

        let transport = self.factory.select(environment).await?;
        chosen.insert(role, Arc::clone(&transport));
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use envsync_agent::{AgentService, Site};
    use envsync_core::{ShellAuth, ShellCredential, TransportKind};

    use super::*;

    fn settings() -> TransportSettings {
        TransportSettings {
            control_timeout_secs: 1,
            ssh_program: "envsync-test-no-such-ssh".into(),
            ..Default::default()
        }
    }

    fn shell_credential() -> ShellCredential {
        ShellCredential {
            host: "127.0.0.1".into(),
            port: 1,
            user: "deploy".into(),
            auth: ShellAuth::KeyFile {
                path: PathBuf::from("/nonexistent/key"),
            },
            root_path: "/srv/site".into(),
        }
    }

    #[tokio::test]
    async fn test_local_site_wins() {
        let dir = tempfile::tempdir().unwrap();
        let service = AgentService::offline(Site::open(dir.path()).await.unwrap());
        let factory = DefaultTransportFactory::new(settings())
            .with_local(LocalSites::new().with_site("http://local.test", service));

        let env = Environment::new("dev", "http://local.test", "admin", "tok")
            .with_shell(shell_credential());
        let transport = factory.select(&env).await.unwrap();
        assert_eq!(transport.kind(), TransportKind::Local);
    }

    #[tokio::test]
    async fn test_failed_shell_falls_back_to_object() {
        let factory = DefaultTransportFactory::new(settings());
        let env = Environment::new("prod", "https://prod.test", "admin", "tok")
            .with_shell(shell_credential());

        let transport = factory.select(&env).await.unwrap();
        assert_eq!(transport.kind(), TransportKind::Object);
    }

    #[tokio::test]
    async fn test_no_shell_credential_uses_object() {
        let factory = DefaultTransportFactory::new(settings());
        let env = Environment::new("prod", "https://prod.test", "admin", "tok");

        let transport = factory.select(&env).await.unwrap();
        assert_eq!(transport.kind(), TransportKind::Object);
    }

    #[tokio::test]
    async fn test_unusable_url_is_an_error() {
        let factory = DefaultTransportFactory::new(settings());
        let env = Environment::new("prod", "", "admin", "tok");
        assert!(factory.select(&env).await.is_err());
    }

    struct CountingFactory {
        inner: DefaultTransportFactory,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TransportFactory for CountingFactory {
        async fn select(&self, environment: &Environment) -> SyncResult<Arc<dyn TransportStrategy>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.select(environment).await
        }
    }

    #[tokio::test]
    async fn test_selection_is_memoized_per_role() {
        let factory = Arc::new(CountingFactory {
            inner: DefaultTransportFactory::new(settings()),
            calls: AtomicUsize::new(0),
        });
        let selector = TransportSelector::new(factory.clone());
        let env = Environment::new("prod", "https://prod.test", "admin", "tok");

        selector.get(EnvironmentRole::Target, &env).await.unwrap();
        selector.get(EnvironmentRole::Target, &env).await.unwrap();
        selector.get(EnvironmentRole::Source, &env).await.unwrap();

        assert_eq!(factory.calls.load(Ordering::SeqCst), 2);
    }
}
