//! # envsync
//!
//! Control server for environment synchronization and the Remote Agent
//! that runs on each installation.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  control app ──► envsync serve (8780) ──► SyncEngine ──► SQLite store  │
//! │                          │                                              │
//! │                          ├── ssh ──► envsync agent exec  (stdin/stdout) │
//! │                          └── http ─► envsync agent serve (8790)         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Logs go to stderr so `agent exec` keeps stdout for replies.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use envsync_agent::{
    AgentConfig, AgentServer, AgentService, HttpRegistry, NoRegistry, RegistryClient, Role, Site,
    TokenStore,
};
use envsync_engine::{ControlServer, EngineConfig, SyncEngine};

#[derive(Debug, Parser)]
#[command(name = "envsync", version, about = "Synchronize installations between environments")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the control API.
    Serve {
        /// Engine config file (defaults to the user config directory).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overrides `server.bind_addr`.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Write the default engine config, or validate and rewrite an existing one.
    InitConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Remote Agent commands, run on an installation host.
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },
}

#[derive(Debug, Subcommand)]
enum AgentCommand {
    /// Serve the agent over HTTP.
    Serve {
        #[arg(long, conflicts_with = "root")]
        config: Option<PathBuf>,
        #[arg(long, required_unless_present = "config")]
        root: Option<PathBuf>,
        #[arg(long)]
        bind: Option<String>,
    },
    /// Answer requests on stdin/stdout (used over ssh).
    Exec {
        #[arg(long)]
        root: PathBuf,
    },
    /// Create an application token and print it.
    IssueToken {
        #[arg(long)]
        root: PathBuf,
        #[arg(long)]
        username: String,
        #[arg(long, default_value = "owner")]
        role: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config, bind } => serve(config, bind).await,
        Command::InitConfig { config } => init_config(config),
        Command::Agent { command } => match command {
            AgentCommand::Serve { config, root, bind } => agent_serve(config, root, bind).await,
            AgentCommand::Exec { root } => agent_exec(root).await,
            AgentCommand::IssueToken {
                root,
                username,
                role,
            } => issue_token(root, &username, &role).await,
        },
    }
}

// =============================================================================
// Control server
// =============================================================================

async fn serve(config_path: Option<PathBuf>, bind: Option<String>) -> Result<()> {
    info!("Starting envsync control server...");

    let mut config = EngineConfig::load(config_path).context("loading engine config")?;
    if let Some(bind) = bind {
        config.server.bind_addr = bind;
    }
    info!(
        bind_addr = %config.server.bind_addr,
        database = %config.store.database.display(),
        "Configuration loaded"
    );

    let engine = SyncEngine::from_config(&config)
        .await
        .context("opening operation store")?;

    ControlServer::new(&config.server.bind_addr, engine)
        .run(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_config(config_path: Option<PathBuf>) -> Result<()> {
    let config = EngineConfig::load(config_path.clone()).context("loading engine config")?;
    config.save(config_path).context("writing engine config")?;
    Ok(())
}

// =============================================================================
// Remote Agent
// =============================================================================

async fn open_site(config: &AgentConfig) -> Result<AgentService> {
    let site = Site::open_with_database(&config.root, config.database_path())
        .await
        .with_context(|| format!("opening site at {}", config.root.display()))?;

    let registry: Arc<dyn RegistryClient> = match &config.registry_url {
        Some(url) => Arc::new(HttpRegistry::new(
            url,
            Duration::from_secs(config.registry_timeout_secs),
        )?),
        None => Arc::new(NoRegistry),
    };
    Ok(AgentService::new(site, registry))
}

fn agent_config(root: PathBuf) -> Result<AgentConfig> {
    let mut config = AgentConfig::new(root);
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

async fn agent_serve(
    config_path: Option<PathBuf>,
    root: Option<PathBuf>,
    bind: Option<String>,
) -> Result<()> {
    let mut config = match (config_path, root) {
        (Some(path), _) => AgentConfig::load(&path)
            .with_context(|| format!("loading agent config {}", path.display()))?,
        (None, Some(root)) => agent_config(root)?,
        (None, None) => anyhow::bail!("either --config or --root is required"),
    };
    if let Some(bind) = bind {
        config.bind_addr = bind;
    }

    let service = open_site(&config).await?;
    info!(root = %config.root.display(), bind_addr = %config.bind_addr, "Starting Remote Agent");

    AgentServer::new(&config, service)
        .run(shutdown_signal())
        .await?;

    info!("Remote Agent stopped");
    Ok(())
}

async fn agent_exec(root: PathBuf) -> Result<()> {
    let config = agent_config(root)?;
    let service = open_site(&config).await?;

    envsync_agent::exec::run(&service, tokio::io::stdin(), tokio::io::stdout()).await?;
    service.site().close().await;
    Ok(())
}

async fn issue_token(root: PathBuf, username: &str, role: &str) -> Result<()> {
    let role: Role = role.parse()?;
    let config = agent_config(root)?;
    let site = Site::open_with_database(&config.root, config.database_path()).await?;

    let token = TokenStore::new(site.pool().clone())
        .issue(username, role)
        .await?;
    info!(username = %username, role = %role, "Token issued");
    println!("{}", token);

    site.close().await;
    Ok(())
}

// =============================================================================
// Signals
// =============================================================================

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_agent_serve_requires_root_or_config() {
        assert!(Cli::try_parse_from(["envsync", "agent", "serve"]).is_err());
        assert!(Cli::try_parse_from(["envsync", "agent", "serve", "--root", "/srv/site"]).is_ok());
        assert!(Cli::try_parse_from(["envsync", "agent", "serve", "--config", "agent.toml"]).is_ok());
    }

    #[test]
    fn test_init_config_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");

        init_config(Some(path.clone())).unwrap();
        assert!(path.exists());
        assert!(EngineConfig::load(Some(path)).is_ok());
    }

    #[test]
    fn test_issue_token_defaults_to_owner() {
        let cli = Cli::try_parse_from([
            "envsync",
            "agent",
            "issue-token",
            "--root",
            "/srv/site",
            "--username",
            "admin",
        ])
        .unwrap();
        let Command::Agent {
            command: AgentCommand::IssueToken { role, .. },
        } = cli.command
        else {
            panic!("expected issue-token");
        };
        assert_eq!(role, "owner");
    }
}
