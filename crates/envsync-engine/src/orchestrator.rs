//! # Sync Orchestrator
//!
//! Runs each SyncOperation as one sequential task.
//!
//! ## Operation Lifecycle
//! ```text
//! StartSync ──► validate ──► insert (pending) ──► spawn run task ──► id
//!                  │
//!                  └── InvalidRequest, nothing stored
//!
//! run task
//! ────────
//!   pending ──► running
//!   select transports (Local / Shell / Object), probe status with backoff  ──► 10%
//!   extensions ──────────────────────────────────────────────────────────────► 40%
//!   themes ──────────────────────────────────────────────────────────────────► 55%
//!   tables ──┬───────────────────────────────────────────────────────────────► 70%
//!            └── conflicts? ── awaiting_resolution ── (gate) ──┬── resolved: apply in list order
//!                                                               └── discarded: tables fail
//!   media ───────────────────────────────────────────────────────────────────► 80%
//!   completed (succeeded | partially_succeeded) ─────────────────────────────► 100%
//!
//!   fatal error at any point ──► failed
//!
//! engine restart ──► every pending/running record ──► failed
//! ```
//!
//! The run task is the only writer of its operation record. Control calls
//! (`SubmitConflictResolutions`, `DiscardPendingPush`) write conflicts and
//! signal the task through its gate; they never touch the record itself.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};

use envsync_agent::{HttpRegistry, NoRegistry, RegistryClient};
use envsync_core::progress::{item_progress, phase_end, VALIDATION_END};
use envsync_core::validation::{parse_direction, validate_request};
use envsync_core::{
    ComponentKind, ComponentSelection, Conflict, ConflictState, Environment, ItemResult,
    Resolution, SyncOperation,
};
use envsync_db::{Database, DbConfig};

use crate::config::{EngineConfig, TransportSettings};
use crate::conflict;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::migrator::{migrator_for, MigrationContext, MigrationOutcome};
use crate::transport::{
    DefaultTransportFactory, EnvironmentRole, TransportFactory, TransportSelector,
    TransportStrategy,
};

// =============================================================================
// Requests
// =============================================================================

/// Input of `StartSync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSyncRequest {
    pub source: Environment,
    pub target: Environment,
    /// `push` or `pull`.
    pub direction: String,
    #[serde(default)]
    pub selection: ComponentSelection,
}

/// One operator decision in `SubmitConflictResolutions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionRequest {
    pub conflict_id: String,
    pub resolution: Resolution,
}

const INTERRUPTED: &str = "interrupted by engine restart";

/// What releases an operation held for conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateSignal {
    Resolved,
    Discard,
}

type Gates = Arc<Mutex<HashMap<String, mpsc::Sender<GateSignal>>>>;

// =============================================================================
// Sync Engine
// =============================================================================

/// The orchestrator. Cloning is cheap; clones share store, gates and events.
#[derive(Clone)]
pub struct SyncEngine {
    db: Database,
    factory: Arc<dyn TransportFactory>,
    registry: Arc<dyn RegistryClient>,
    settings: TransportSettings,
    events: EventBus,
    gates: Gates,
}

impl SyncEngine {
    pub fn new(db: Database, factory: Arc<dyn TransportFactory>, settings: TransportSettings) -> Self {
        SyncEngine {
            db,
            factory,
            registry: Arc::new(NoRegistry),
            settings,
            events: EventBus::new(),
            gates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registry consulted before shipping extension and theme trees.
    pub fn with_registry(mut self, registry: Arc<dyn RegistryClient>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Opens the store and wires the default transports from configuration.
    ///
    /// Operations a previous process left `pending` or `running` are failed
    /// first; their run tasks and gates did not survive the restart.
    pub async fn from_config(config: &EngineConfig) -> SyncResult<Self> {
        let db = Database::new(DbConfig::new(config.store.database.clone())).await?;
        let interrupted = db.operations().fail_unfinished(INTERRUPTED).await?;
        if interrupted > 0 {
            warn!(operations = interrupted, "Failed operations interrupted by a restart");
        }
        let factory = Arc::new(DefaultTransportFactory::new(config.transport.clone()));

        let registry: Arc<dyn RegistryClient> = match &config.registry.url {
            Some(url) => Arc::new(HttpRegistry::new(
                url,
                Duration::from_secs(config.registry.timeout_secs),
            )?),
            None => Arc::new(NoRegistry),
        };

        Ok(Self::new(db, factory, config.transport.clone()).with_registry(registry))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // =========================================================================
    // Control operations
    // =========================================================================

    /// Validates, stores and starts an operation. Returns its id at once.
    pub async fn start_sync(&self, request: StartSyncRequest) -> SyncResult<String> {
        let direction = parse_direction(&request.direction)?;
        validate_request(&request.source, &request.target, &request.selection)?;

        let op = SyncOperation::new(
            &request.source,
            &request.target,
            direction,
            request.selection.clone(),
        );
        self.db.operations().insert(&op).await?;

        info!(
            operation_id = %op.id,
            source = %op.source_name,
            target = %op.target_name,
            direction = %direction,
            items = op.selection.item_count(),
            "Sync operation created"
        );

        let id = op.id.clone();
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run(op, request.source, request.target).await;
        });
        Ok(id)
    }

    /// Current state of an operation.
    pub async fn get_status(&self, operation_id: &str) -> SyncResult<SyncOperation> {
        self.db
            .operations()
            .get(operation_id)
            .await?
            .ok_or_else(|| SyncError::OperationNotFound(operation_id.to_string()))
    }

    /// Most recent operations, newest first.
    pub async fn list_operations(&self, limit: u32) -> SyncResult<Vec<SyncOperation>> {
        Ok(self.db.operations().list_recent(limit).await?)
    }

    /// Conflicts of an operation in list order.
    pub async fn list_conflicts(&self, operation_id: &str) -> SyncResult<Vec<Conflict>> {
        self.get_status(operation_id).await?;
        Ok(self.db.conflicts().list(operation_id).await?)
    }

    /// Stores resolutions and returns how many conflicts are still unset.
    /// The operation resumes when that reaches zero.
    ///
    /// The gate map lock is held from the membership check until the gate is
    /// released, so once one submission resolves the last conflict every
    /// later one is refused before it writes anything.
    pub async fn submit_conflict_resolutions(
        &self,
        operation_id: &str,
        resolutions: Vec<ResolutionRequest>,
    ) -> SyncResult<u64> {
        self.get_status(operation_id).await?;

        if resolutions.is_empty() {
            return Err(SyncError::InvalidRequest("no resolutions given".into()));
        }
        if let Some(unset) = resolutions.iter().find(|r| !r.resolution.is_set()) {
            return Err(SyncError::InvalidRequest(format!(
                "conflict {} needs push, pull or skip",
                unset.conflict_id
            )));
        }

        let mut gates = self.gates.lock().await;
        if !gates.contains_key(operation_id) {
            return Err(not_awaiting(operation_id));
        }

        let known: HashSet<String> = self
            .db
            .conflicts()
            .list(operation_id)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        if let Some(unknown) = resolutions.iter().find(|r| !known.contains(&r.conflict_id)) {
            return Err(SyncError::InvalidRequest(format!(
                "conflict {} does not belong to operation {}",
                unknown.conflict_id, operation_id
            )));
        }

        for r in &resolutions {
            self.db
                .conflicts()
                .set_resolution(operation_id, &r.conflict_id, r.resolution)
                .await?;
        }

        let remaining = self.db.conflicts().unresolved_count(operation_id).await?.max(0) as u64;
        info!(
            operation_id = %operation_id,
            submitted = resolutions.len(),
            remaining,
            "Conflict resolutions stored"
        );

        if remaining == 0 {
            let gate = gates.remove(operation_id);
            drop(gates);
            if let Some(gate) = gate {
                signal(operation_id, gate, GateSignal::Resolved).await?;
            }
        }
        Ok(remaining)
    }

    /// Drops the held database push of an operation awaiting resolution.
    /// Components already applied stay applied.
    pub async fn discard_pending_push(&self, operation_id: &str) -> SyncResult<()> {
        self.get_status(operation_id).await?;

        let gate = self.gates.lock().await.remove(operation_id);
        let Some(gate) = gate else {
            return Err(not_awaiting(operation_id));
        };
        info!(operation_id = %operation_id, "Discarding pending push");
        signal(operation_id, gate, GateSignal::Discard).await
    }

    /// Stream of progress events for every operation.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Run task
    // =========================================================================

    async fn run(&self, mut op: SyncOperation, source: Environment, target: Environment) {
        let operation_id = op.id.clone();

        if let Err(e) = self.execute(&mut op, &source, &target).await {
            error!(operation_id = %operation_id, error = %e, "Sync operation failed");
            match op.fail(e.to_string()) {
                Ok(()) => {
                    if let Err(store) = self.db.operations().save(&op).await {
                        error!(operation_id = %operation_id, error = %store, "Failed to record failure");
                    }
                    self.events.publish(SyncEvent::Failed {
                        operation_id: operation_id.clone(),
                        error: e.to_string(),
                    });
                }
                Err(state) => {
                    error!(operation_id = %operation_id, error = %state, "Operation already finished");
                }
            }
        }

        self.gates.lock().await.remove(&operation_id);
    }

    async fn execute(
        &self,
        op: &mut SyncOperation,
        source: &Environment,
        target: &Environment,
    ) -> SyncResult<()> {
        op.start()?;
        self.save(op).await?;
        self.events.publish(SyncEvent::Started {
            operation_id: op.id.clone(),
        });

        let selector = TransportSelector::new(Arc::clone(&self.factory));
        let source_transport = selector.get(EnvironmentRole::Source, source).await?;
        let target_transport = selector.get(EnvironmentRole::Target, target).await?;

        self.ensure_reachable(source_transport.as_ref(), source.label())
            .await?;
        self.ensure_reachable(target_transport.as_ref(), target.label())
            .await?;
        self.advance(
            op,
            VALIDATION_END,
            format!(
                "Environments reachable ({} via {}, {} via {})",
                source.label(),
                source_transport.kind(),
                target.label(),
                target_transport.kind()
            ),
        )
        .await?;

        let ctx = MigrationContext {
            operation_id: op.id.clone(),
            direction: op.direction,
            source: source_transport,
            target: target_transport,
            registry: Arc::clone(&self.registry),
        };

        for kind in ComponentKind::ORDER {
            let names = op.selection.names(kind);
            if names.is_empty() {
                self.advance(op, phase_end(kind), format!("No {} selected", kind))
                    .await?;
                continue;
            }

            let mut conflicts = Vec::new();
            let migrator = migrator_for(kind);
            for (index, name) in names.iter().enumerate() {
                op.note(format!("Migrating {} {}", kind, name))?;
                debug!(operation_id = %op.id, kind = %kind, name = %name, "Migrating item");

                match migrator.migrate(&ctx, name).await {
                    Ok(MigrationOutcome::Done(message)) => {
                        let item = ItemResult::succeeded(kind, name, message, ctx.item_transport());
                        self.record(op, item).await?;
                    }
                    Ok(MigrationOutcome::Conflicts(found)) => conflicts.extend(found),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(operation_id = %op.id, kind = %kind, name = %name, error = %e, "Item failed");
                        let transport = (!e.is_pre_transfer()).then(|| ctx.item_transport());
                        let item = ItemResult::failed(kind, name, e.to_string(), transport);
                        self.record(op, item).await?;
                    }
                }

                self.advance(
                    op,
                    item_progress(kind, index, names.len()),
                    format!("Migrated {} {}", kind, name),
                )
                .await?;
            }

            if !conflicts.is_empty() {
                self.hold_for_resolution(op, &ctx, conflicts).await?;
            }
        }

        let outcome = op.complete()?;
        self.save(op).await?;
        info!(operation_id = %op.id, outcome = ?outcome, "Sync operation completed");
        self.events.publish(SyncEvent::Completed {
            operation_id: op.id.clone(),
            outcome,
            summary: op.summary(),
        });
        Ok(())
    }

    /// Probes the agent's status, retrying transient failures with
    /// exponential backoff for up to the control timeout.
    async fn ensure_reachable(&self, transport: &dyn TransportStrategy, label: &str) -> SyncResult<()> {
        let policy = ExponentialBackoff {
            initial_interval: self.settings.initial_backoff(),
            max_interval: self.settings.control_timeout(),
            multiplier: 2.0,
            max_elapsed_time: Some(self.settings.control_timeout()),
            ..Default::default()
        };

        let probe = move || async move {
            transport.status().await.map(|_| ()).map_err(|e| {
                if e.is_retryable() {
                    debug!(environment = %label, error = %e, "Status probe failed, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        };

        match backoff::future::retry(policy, probe).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_authentication() => Err(e),
            Err(e) => Err(SyncError::ConnectionFailed(format!(
                "cannot reach {}: {}",
                label, e
            ))),
        }
    }

    /// Holds the operation until every conflict is resolved or the push is
    /// discarded, then applies or drops the held tables.
    async fn hold_for_resolution(
        &self,
        op: &mut SyncOperation,
        ctx: &MigrationContext,
        conflicts: Vec<Conflict>,
    ) -> SyncResult<()> {
        self.db.conflicts().insert_all(&conflicts).await?;

        let tables = distinct_tables(&conflicts);
        let (gate, mut signal) = mpsc::channel(1);
        self.gates.lock().await.insert(op.id.clone(), gate);

        op.set_conflict_state(ConflictState::AwaitingResolution)?;
        op.note(format!(
            "Waiting for resolution of {} conflict(s) in {}",
            conflicts.len(),
            tables.join(", ")
        ))?;
        self.save(op).await?;
        info!(operation_id = %op.id, conflicts = conflicts.len(), "Awaiting conflict resolution");
        self.events.publish(SyncEvent::ConflictsDetected {
            operation_id: op.id.clone(),
            count: conflicts.len(),
        });

        let decision = signal.recv().await.unwrap_or(GateSignal::Discard);
        self.gates.lock().await.remove(&op.id);

        match decision {
            GateSignal::Resolved => {
                let resolved = self.db.conflicts().list(&op.id).await?;
                let mut outcomes: Vec<(String, Vec<String>, Option<String>)> =
                    tables.into_iter().map(|t| (t, Vec::new(), None)).collect();

                for conflict in &resolved {
                    let result =
                        conflict::apply_resolution(conflict, ctx.source.as_ref(), ctx.target.as_ref())
                            .await;
                    let Some(entry) = outcomes.iter_mut().find(|(t, _, _)| *t == conflict.table) else {
                        continue;
                    };
                    match result {
                        Ok(message) => entry.1.push(message),
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            warn!(
                                operation_id = %op.id,
                                table = %conflict.table,
                                error = %e,
                                "Applying resolution failed"
                            );
                            entry.2.get_or_insert_with(|| e.to_string());
                        }
                    }
                }

                for (table, messages, failure) in outcomes {
                    let item = match failure {
                        None => ItemResult::succeeded(
                            ComponentKind::Table,
                            &table,
                            messages.join("; "),
                            ctx.item_transport(),
                        ),
                        Some(e) => ItemResult::failed(
                            ComponentKind::Table,
                            &table,
                            e,
                            Some(ctx.item_transport()),
                        ),
                    };
                    self.record(op, item).await?;
                }
                op.set_conflict_state(ConflictState::Resolved)?;
            }
            GateSignal::Discard => {
                for table in tables {
                    let item =
                        ItemResult::failed(ComponentKind::Table, &table, "pending push discarded", None);
                    self.record(op, item).await?;
                }
                op.set_conflict_state(ConflictState::Discarded)?;
            }
        }

        self.save(op).await
    }

    // =========================================================================
    // Record updates
    // =========================================================================

    async fn save(&self, op: &SyncOperation) -> SyncResult<()> {
        Ok(self.db.operations().save(op).await?)
    }

    async fn advance(&self, op: &mut SyncOperation, progress: u8, message: String) -> SyncResult<()> {
        op.advance(progress, message)?;
        self.save(op).await?;
        self.events.publish(SyncEvent::Progress {
            operation_id: op.id.clone(),
            progress: op.progress,
            message: op.message.clone().unwrap_or_default(),
        });
        Ok(())
    }

    async fn record(&self, op: &mut SyncOperation, item: ItemResult) -> SyncResult<()> {
        op.record_item(item.clone())?;
        self.save(op).await?;
        self.events.publish(SyncEvent::ItemFinished {
            operation_id: op.id.clone(),
            item,
        });
        Ok(())
    }
}

fn not_awaiting(operation_id: &str) -> SyncError {
    SyncError::InvalidRequest(format!(
        "operation {} is not awaiting conflict resolution",
        operation_id
    ))
}

/// Releases a held run task. The gate was removed from the map by the caller.
async fn signal(
    operation_id: &str,
    gate: mpsc::Sender<GateSignal>,
    decision: GateSignal,
) -> SyncResult<()> {
    gate.send(decision)
        .await
        .map_err(|_| SyncError::ChannelError(format!("operation {} stopped waiting", operation_id)))
}

/// Tables in order of first appearance.
fn distinct_tables(conflicts: &[Conflict]) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for conflict in conflicts {
        if !tables.contains(&conflict.table) {
            tables.push(conflict.table.clone());
        }
    }
    tables
}
