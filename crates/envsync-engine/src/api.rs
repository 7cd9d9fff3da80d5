//! # Control API
//!
//! JSON over HTTP for the control application.
//!
//! ```text
//! POST /api/v1/syncs                       StartSync             → 201 {operationId}
//! GET  /api/v1/syncs                       recent operations
//! GET  /api/v1/syncs/{id}                  GetStatus             → SyncOperation
//! GET  /api/v1/syncs/{id}/conflicts        ListConflicts         → [Conflict]
//! POST /api/v1/syncs/{id}/resolutions      SubmitConflictResolutions → {remaining}
//! POST /api/v1/syncs/{id}/discard-push     DiscardPendingPush    → 202
//! GET  /health
//! ```
//!
//! `InvalidRequest` answers 400, an unknown operation 404, anything else 500.
//! Error bodies are `{"error": "..."}`.

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

use envsync_core::{Conflict, SyncOperation};

use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{ResolutionRequest, StartSyncRequest, SyncEngine};

/// Default page size of the operation list.
const DEFAULT_LIST_LIMIT: u32 = 50;

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSyncResponse {
    pub operation_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResolutionsBody {
    pub resolutions: Vec<ResolutionRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResolutionsResponse {
    /// Conflicts still without a resolution.
    pub remaining: u64,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorBody {
    error: String,
}

impl SyncError {
    /// HTTP status of this error on the control API.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SyncError::OperationNotFound(_) => StatusCode::NOT_FOUND,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Control request failed");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

fn bad_json(rejection: JsonRejection) -> SyncError {
    SyncError::InvalidRequest(rejection.body_text())
}

// =============================================================================
// Router
// =============================================================================

pub fn router(engine: SyncEngine) -> Router {
    Router::new()
        .route("/api/v1/syncs", post(start_handler).get(list_handler))
        .route("/api/v1/syncs/{id}", get(status_handler))
        .route("/api/v1/syncs/{id}/conflicts", get(conflicts_handler))
        .route("/api/v1/syncs/{id}/resolutions", post(resolutions_handler))
        .route("/api/v1/syncs/{id}/discard-push", post(discard_handler))
        .route("/health", get(health_handler))
        .with_state(engine)
}

async fn health_handler(State(engine): State<SyncEngine>) -> impl IntoResponse {
    if engine.database().health_check().await {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
    }
}

async fn start_handler(
    State(engine): State<SyncEngine>,
    body: Result<Json<StartSyncRequest>, JsonRejection>,
) -> SyncResult<(StatusCode, Json<StartSyncResponse>)> {
    let Json(request) = body.map_err(bad_json)?;
    let operation_id = engine.start_sync(request).await?;
    Ok((StatusCode::CREATED, Json(StartSyncResponse { operation_id })))
}

async fn list_handler(
    State(engine): State<SyncEngine>,
    Query(params): Query<ListParams>,
) -> SyncResult<Json<Vec<SyncOperation>>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    Ok(Json(engine.list_operations(limit).await?))
}

async fn status_handler(
    State(engine): State<SyncEngine>,
    Path(id): Path<String>,
) -> SyncResult<Json<SyncOperation>> {
    Ok(Json(engine.get_status(&id).await?))
}

async fn conflicts_handler(
    State(engine): State<SyncEngine>,
    Path(id): Path<String>,
) -> SyncResult<Json<Vec<Conflict>>> {
    Ok(Json(engine.list_conflicts(&id).await?))
}

async fn resolutions_handler(
    State(engine): State<SyncEngine>,
    Path(id): Path<String>,
    body: Result<Json<SubmitResolutionsBody>, JsonRejection>,
) -> SyncResult<Json<SubmitResolutionsResponse>> {
    let Json(body) = body.map_err(bad_json)?;
    let remaining = engine
        .submit_conflict_resolutions(&id, body.resolutions)
        .await?;
    Ok(Json(SubmitResolutionsResponse { remaining }))
}

async fn discard_handler(
    State(engine): State<SyncEngine>,
    Path(id): Path<String>,
) -> SyncResult<StatusCode> {
    engine.discard_pending_push(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

// =============================================================================
// Control Server
// =============================================================================

/// The control API server.
pub struct ControlServer {
    bind_addr: String,
    app: Router,
}

/// Handle for a started control server.
#[derive(Clone)]
pub struct ControlHandle {
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
}

impl ControlHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Control server shutdown channel closed".into()))
    }
}

impl ControlServer {
    pub fn new(bind_addr: &str, engine: SyncEngine) -> Self {
        ControlServer {
            bind_addr: bind_addr.to_string(),
            app: router(engine),
        }
    }

    async fn bind(&self) -> SyncResult<TcpListener> {
        TcpListener::bind(&self.bind_addr).await.map_err(|e| {
            SyncError::InvalidConfig(format!("Failed to bind to {}: {}", self.bind_addr, e))
        })
    }

    /// Starts serving in the background.
    pub async fn start(self) -> SyncResult<ControlHandle> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let listener = self.bind().await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Control API started");

        tokio::spawn(async move {
            axum::serve(listener, self.app)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await;
                    info!("Control API shutting down");
                })
                .await
                .ok();
        });

        Ok(ControlHandle {
            local_addr,
            shutdown_tx,
        })
    }

    /// Serves in the foreground until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> SyncResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind().await?;
        info!(addr = %listener.local_addr()?, "Control API listening");

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Control API stopped");
        Ok(())
    }
}
