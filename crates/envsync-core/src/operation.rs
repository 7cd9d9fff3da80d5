//! # Sync Operation
//!
//! The inspectable state of one end-to-end migration run.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     SyncOperation Lifecycle                             │
//! │                                                                         │
//! │   ┌─────────┐  start()   ┌─────────┐  complete()  ┌───────────┐        │
//! │   │ Pending │ ─────────► │ Running │ ───────────► │ Completed │        │
//! │   └────┬────┘            └────┬────┘              └───────────┘        │
//! │        │                      │                                         │
//! │        │ fail()               │ fail()            ┌───────────┐        │
//! │        └──────────────────────┴─────────────────► │  Failed   │        │
//! │                                                    └───────────┘        │
//! │                                                                         │
//! │   Running sub-state (database push only):                              │
//! │   conflict_state: None ─► AwaitingResolution ─► Resolved | Discarded   │
//! │                                                                         │
//! │   RULES:                                                               │
//! │   • progress never decreases                                           │
//! │   • Completed / Failed are final; every mutator rejects them           │
//! │   • error_message is Some exactly when status is Failed               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::types::{ComponentKind, ComponentSelection, Direction, Environment, TransportKind};

// =============================================================================
// Status Enums
// =============================================================================

/// Lifecycle status of a SyncOperation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Running => "running",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an operation stands with respect to database conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ConflictState {
    #[default]
    None,
    AwaitingResolution,
    Resolved,
    Discarded,
}

/// Final verdict once an operation is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every item migrated.
    Succeeded,
    /// Some items failed, the operation still completed.
    PartiallySucceeded,
    /// A fatal error stopped the operation.
    Failed,
}

// =============================================================================
// Item Result
// =============================================================================

/// Result of migrating one extension, theme, table or the media library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub kind: ComponentKind,
    pub name: String,
    pub success: bool,
    pub message: String,
    /// `None` when the item failed before a transport was involved.
    pub transport: Option<TransportKind>,
}

impl ItemResult {
    pub fn succeeded(kind: ComponentKind, name: &str, message: impl Into<String>, transport: TransportKind) -> Self {
        ItemResult {
            kind,
            name: name.to_string(),
            success: true,
            message: message.into(),
            transport: Some(transport),
        }
    }

    pub fn failed(
        kind: ComponentKind,
        name: &str,
        message: impl Into<String>,
        transport: Option<TransportKind>,
    ) -> Self {
        ItemResult {
            kind,
            name: name.to_string(),
            success: false,
            message: message.into(),
            transport,
        }
    }
}

// =============================================================================
// Sync Operation
// =============================================================================

/// One migration run, owned and mutated only by the task executing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    pub id: String,
    pub source_name: String,
    pub source_url: String,
    pub target_name: String,
    pub target_url: String,
    pub direction: Direction,
    pub selection: ComponentSelection,
    pub status: OperationStatus,
    /// 0 to 100, never decreasing.
    pub progress: u8,
    /// Latest human-readable step.
    pub message: Option<String>,
    pub error_message: Option<String>,
    pub conflict_state: ConflictState,
    pub outcome: Option<Outcome>,
    pub items: Vec<ItemResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncOperation {
    /// Creates a new operation in `Pending`.
    pub fn new(
        source: &Environment,
        target: &Environment,
        direction: Direction,
        selection: ComponentSelection,
    ) -> Self {
        SyncOperation {
            id: Uuid::new_v4().to_string(),
            source_name: source.label().to_string(),
            source_url: source.base_url.clone(),
            target_name: target.label().to_string(),
            target_url: target.base_url.clone(),
            direction,
            selection,
            status: OperationStatus::Pending,
            progress: 0,
            message: Some("Queued".to_string()),
            error_message: None,
            conflict_state: ConflictState::None,
            outcome: None,
            items: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn ensure_active(&self) -> CoreResult<()> {
        if self.is_terminal() {
            return Err(CoreError::OperationFinished {
                operation_id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    /// `Pending` → `Running`.
    pub fn start(&mut self) -> CoreResult<()> {
        if self.status != OperationStatus::Pending {
            return Err(CoreError::InvalidTransition {
                operation_id: self.id.clone(),
                from: self.status.to_string(),
                to: OperationStatus::Running.to_string(),
            });
        }
        self.status = OperationStatus::Running;
        self.started_at = Some(Utc::now());
        self.message = Some("Validating environments".to_string());
        Ok(())
    }

    /// Raises progress to `progress` (clamped to 100). Lower values are ignored.
    pub fn advance(&mut self, progress: u8, message: impl Into<String>) -> CoreResult<()> {
        self.ensure_active()?;
        self.progress = self.progress.max(progress.min(100));
        self.message = Some(message.into());
        Ok(())
    }

    /// Updates the message without touching progress.
    pub fn note(&mut self, message: impl Into<String>) -> CoreResult<()> {
        self.ensure_active()?;
        self.message = Some(message.into());
        Ok(())
    }

    pub fn record_item(&mut self, item: ItemResult) -> CoreResult<()> {
        self.ensure_active()?;
        self.items.push(item);
        Ok(())
    }

    pub fn set_conflict_state(&mut self, state: ConflictState) -> CoreResult<()> {
        self.ensure_active()?;
        self.conflict_state = state;
        Ok(())
    }

    /// `Running` → `Completed`. Returns the outcome derived from item results.
    pub fn complete(&mut self) -> CoreResult<Outcome> {
        self.ensure_active()?;
        if self.status != OperationStatus::Running {
            return Err(CoreError::InvalidTransition {
                operation_id: self.id.clone(),
                from: self.status.to_string(),
                to: OperationStatus::Completed.to_string(),
            });
        }

        let outcome = if self.items.iter().all(|item| item.success) {
            Outcome::Succeeded
        } else {
            Outcome::PartiallySucceeded
        };

        self.status = OperationStatus::Completed;
        self.progress = 100;
        self.outcome = Some(outcome);
        self.completed_at = Some(Utc::now());
        self.message = Some(self.summary());
        Ok(outcome)
    }

    /// Moves to `Failed`. Allowed exactly once, from any non-terminal status.
    pub fn fail(&mut self, error: impl Into<String>) -> CoreResult<()> {
        self.ensure_active()?;
        let error = error.into();
        self.status = OperationStatus::Failed;
        self.outcome = Some(Outcome::Failed);
        self.completed_at = Some(Utc::now());
        self.message = Some(format!("Failed: {}", error));
        self.error_message = Some(error);
        Ok(())
    }

    pub fn failed_items(&self) -> impl Iterator<Item = &ItemResult> {
        self.items.iter().filter(|item| !item.success)
    }

    /// Human-readable summary distinguishing full, partial and fatal outcomes.
    pub fn summary(&self) -> String {
        match (self.status, self.outcome) {
            (OperationStatus::Failed, _) => format!(
                "Failed: {}",
                self.error_message.as_deref().unwrap_or("unknown error")
            ),
            (OperationStatus::Completed, Some(Outcome::Succeeded)) => {
                format!("Completed: all {} item(s) migrated", self.items.len())
            }
            (OperationStatus::Completed, _) => {
                let failed: Vec<String> = self
                    .failed_items()
                    .map(|item| format!("{} {} ({})", item.kind, item.name, item.message))
                    .collect();
                format!(
                    "Completed with errors: {} of {} item(s) migrated; failed: {}",
                    self.items.len() - failed.len(),
                    self.items.len(),
                    failed.join("; ")
                )
            }
            _ => self.message.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operation() -> SyncOperation {
        let source = Environment::new("local", "https://local.test", "admin", "a");
        let target = Environment::new("live", "https://live.test", "admin", "b");
        SyncOperation::new(
            &source,
            &target,
            Direction::Push,
            ComponentSelection::default().with_extension("seo"),
        )
    }

    #[test]
    fn test_lifecycle_to_completed() {
        let mut op = operation();
        assert_eq!(op.status, OperationStatus::Pending);

        op.start().unwrap();
        op.advance(40, "extensions done").unwrap();
        op.record_item(ItemResult::succeeded(
            ComponentKind::Extension,
            "seo",
            "installed",
            TransportKind::Object,
        ))
        .unwrap();

        assert_eq!(op.complete().unwrap(), Outcome::Succeeded);
        assert_eq!(op.progress, 100);
        assert!(op.completed_at.is_some());
        assert!(op.error_message.is_none());
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut op = operation();
        op.start().unwrap();
        op.advance(55, "themes").unwrap();
        op.advance(40, "late report").unwrap();
        assert_eq!(op.progress, 55);
        op.advance(250, "overflow").unwrap();
        assert_eq!(op.progress, 100);
    }

    #[test]
    fn test_fail_only_once() {
        let mut op = operation();
        op.start().unwrap();
        op.fail("cannot reach target").unwrap();

        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.error_message.as_deref(), Some("cannot reach target"));
        assert!(op.fail("second failure").is_err());
        assert_eq!(op.error_message.as_deref(), Some("cannot reach target"));
        assert!(op.advance(90, "after failure").is_err());
        assert!(op.complete().is_err());
    }

    #[test]
    fn test_partial_outcome_summary() {
        let mut op = operation();
        op.start().unwrap();
        op.record_item(ItemResult::succeeded(
            ComponentKind::Extension,
            "seo",
            "ok",
            TransportKind::Shell,
        ))
        .unwrap();
        op.record_item(ItemResult::failed(
            ComponentKind::Theme,
            "dark",
            "not installed on source",
            Some(TransportKind::Shell),
        ))
        .unwrap();

        assert_eq!(op.complete().unwrap(), Outcome::PartiallySucceeded);
        let summary = op.summary();
        assert!(summary.contains("1 of 2"));
        assert!(summary.contains("theme dark"));
    }

    #[test]
    fn test_cannot_complete_pending() {
        let mut op = operation();
        assert!(op.complete().is_err());
        assert!(op.start().is_ok());
        assert!(op.start().is_err());
    }
}
