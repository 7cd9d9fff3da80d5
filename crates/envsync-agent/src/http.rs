//! # Agent HTTP Surface
//!
//! What the Object Transport calls on an installation.
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       AgentServer (Axum)                                │
//! │                                                                         │
//! │  GET  /health                 "OK" (no credential)                     │
//! │                                                                         │
//! │  {agent_path}  (default /agent/v1), HTTP Basic username:token          │
//! │  ├── GET  /status             AgentReply::Status                       │
//! │  ├── POST /command            AgentRequest      → AgentReply           │
//! │  ├── POST /export             FetchRequest      → TransferPayload      │
//! │  └── POST /import             TransferPayload   → ApplyReport          │
//! │                                                                         │
//! │  Errors: AgentReply::Error body, status from AgentError                │
//! │    401 unauthenticated   403 role below administrator                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info};

use envsync_core::{AgentReply, AgentRequest, ApplyReport, FetchRequest, TransferPayload};

use crate::auth::{Role, TokenStore};
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::service::AgentService;

// =============================================================================
// Shared State
// =============================================================================

struct AgentState {
    service: AgentService,
    tokens: TokenStore,
}

impl AgentState {
    async fn authorize(&self, headers: &HeaderMap) -> AgentResult<Role> {
        let (username, token) = basic_credentials(headers)?;
        self.tokens.authorize(&username, &token).await
    }
}

/// Extracts `username:token` from an HTTP Basic header.
fn basic_credentials(headers: &HeaderMap) -> AgentResult<(String, String)> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AgentError::Unauthenticated("missing Authorization header".into()))?;

    let encoded = value
        .strip_prefix("Basic ")
        .ok_or_else(|| AgentError::Unauthenticated("expected Basic credentials".into()))?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AgentError::Unauthenticated("malformed Basic credentials".into()))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| AgentError::Unauthenticated("malformed Basic credentials".into()))?;

    let (username, token) = decoded
        .split_once(':')
        .ok_or_else(|| AgentError::Unauthenticated("malformed Basic credentials".into()))?;
    Ok((username.to_string(), token.to_string()))
}

// =============================================================================
// Router
// =============================================================================

/// Builds the agent router with routes nested under `agent_path`.
pub fn router(service: AgentService, agent_path: &str, max_body_bytes: usize) -> Router {
    let state = Arc::new(AgentState {
        tokens: TokenStore::new(service.site().pool().clone()),
        service,
    });

    let api = Router::new()
        .route("/status", get(status_handler))
        .route("/command", post(command_handler))
        .route("/export", post(export_handler))
        .route("/import", post(import_handler));

    let path = agent_path.trim_end_matches('/');
    let app = if path.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(path, api)
    };

    app.route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn status_handler(
    State(state): State<Arc<AgentState>>,
    headers: HeaderMap,
) -> AgentResult<Json<AgentReply>> {
    state.authorize(&headers).await?;
    Ok(Json(state.service.dispatch(AgentRequest::Status).await?))
}

async fn command_handler(
    State(state): State<Arc<AgentState>>,
    headers: HeaderMap,
    body: Result<Json<AgentRequest>, JsonRejection>,
) -> AgentResult<Json<AgentReply>> {
    state.authorize(&headers).await?;
    let Json(request) = body.map_err(|e| AgentError::InvalidRequest(e.body_text()))?;
    debug!(request = request.type_name(), "HTTP command");
    Ok(Json(state.service.dispatch(request).await?))
}

async fn export_handler(
    State(state): State<Arc<AgentState>>,
    headers: HeaderMap,
    body: Result<Json<FetchRequest>, JsonRejection>,
) -> AgentResult<Json<TransferPayload>> {
    state.authorize(&headers).await?;
    let Json(request) = body.map_err(|e| AgentError::InvalidRequest(e.body_text()))?;
    Ok(Json(state.service.export(&request).await?))
}

async fn import_handler(
    State(state): State<Arc<AgentState>>,
    headers: HeaderMap,
    body: Result<Json<TransferPayload>, JsonRejection>,
) -> AgentResult<Json<ApplyReport>> {
    state.authorize(&headers).await?;
    let Json(payload) = body.map_err(|e| AgentError::InvalidRequest(e.body_text()))?;
    Ok(Json(state.service.import(payload).await?))
}

// =============================================================================
// Agent Server
// =============================================================================

/// The agent's HTTP server.
pub struct AgentServer {
    bind_addr: String,
    app: Router,
}

/// Handle for controlling a started agent server.
#[derive(Clone)]
pub struct AgentHandle {
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
}

impl AgentHandle {
    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Shuts down the agent server.
    pub async fn shutdown(&self) -> AgentResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| AgentError::Internal("Agent shutdown channel closed".into()))
    }
}

impl AgentServer {
    pub fn new(config: &AgentConfig, service: AgentService) -> Self {
        AgentServer {
            bind_addr: config.bind_addr.clone(),
            app: router(service, &config.agent_path, config.max_body_bytes),
        }
    }

    async fn bind(&self) -> AgentResult<TcpListener> {
        TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| AgentError::Internal(format!("Failed to bind to {}: {}", self.bind_addr, e)))
    }

    /// Starts serving in the background and returns a handle.
    pub async fn start(self) -> AgentResult<AgentHandle> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let listener = self.bind().await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Agent server started");

        tokio::spawn(async move {
            axum::serve(listener, self.app)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await;
                    info!("Agent server shutting down");
                })
                .await
                .ok();
        });

        Ok(AgentHandle {
            local_addr,
            shutdown_tx,
        })
    }

    /// Serves in the foreground until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> AgentResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind().await?;
        info!(addr = %listener.local_addr()?, "Agent server listening");

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Agent server stopped");
        Ok(())
    }
}
