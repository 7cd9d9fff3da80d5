//! # Operation Repository
//!
//! Persists [`SyncOperation`] records.
//!
//! ## Write Discipline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  start_sync ──► insert(op)           (status = pending)                │
//! │                    │                                                    │
//! │  operation task ───┴──► save(op) after every state change              │
//! │                                                                         │
//! │  The task holds the authoritative in-memory copy; save() writes the    │
//! │  whole record. progress is stored as MAX(stored, new) and terminal     │
//! │  rows are never overwritten, so a stale copy cannot move it back.      │
//! │                                                                         │
//! │  engine startup ──► fail_unfinished()  (pending/running ──► failed)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use envsync_core::{
    ConflictState, Direction, ItemResult, OperationStatus, Outcome, SyncOperation,
};

use crate::error::{DbError, DbResult};

/// Row shape of `sync_operations`.
#[derive(Debug, FromRow)]
struct OperationRow {
    id: String,
    source_name: String,
    source_url: String,
    target_name: String,
    target_url: String,
    direction: Direction,
    selection: String,
    status: OperationStatus,
    progress: i64,
    message: Option<String>,
    error_message: Option<String>,
    conflict_state: ConflictState,
    outcome: Option<Outcome>,
    items: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<OperationRow> for SyncOperation {
    type Error = DbError;

    fn try_from(row: OperationRow) -> Result<Self, Self::Error> {
        let selection =
            serde_json::from_str(&row.selection).map_err(|e| DbError::invalid_data("selection", e))?;
        let items: Vec<ItemResult> =
            serde_json::from_str(&row.items).map_err(|e| DbError::invalid_data("items", e))?;

        Ok(SyncOperation {
            id: row.id,
            source_name: row.source_name,
            source_url: row.source_url,
            target_name: row.target_name,
            target_url: row.target_url,
            direction: row.direction,
            selection,
            status: row.status,
            progress: row.progress.clamp(0, 100) as u8,
            message: row.message,
            error_message: row.error_message,
            conflict_state: row.conflict_state,
            outcome: row.outcome,
            items,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, source_name, source_url, target_name, target_url, direction,
           selection, status, progress, message, error_message, conflict_state,
           outcome, items, created_at, started_at, completed_at
    FROM sync_operations
"#;

/// Repository for SyncOperation records.
#[derive(Debug, Clone)]
pub struct OperationRepository {
    pool: SqlitePool,
}

impl OperationRepository {
    /// Creates a new OperationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OperationRepository { pool }
    }

    /// Stores a freshly created operation.
    pub async fn insert(&self, op: &SyncOperation) -> DbResult<()> {
        let selection = serde_json::to_string(&op.selection)
            .map_err(|e| DbError::invalid_data("selection", e))?;
        let items =
            serde_json::to_string(&op.items).map_err(|e| DbError::invalid_data("items", e))?;

        debug!(operation_id = %op.id, "Inserting sync operation");

        sqlx::query(
            r#"
            INSERT INTO sync_operations (
                id, source_name, source_url, target_name, target_url, direction,
                selection, status, progress, message, error_message, conflict_state,
                outcome, items, created_at, started_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
        )
        .bind(&op.id)
        .bind(&op.source_name)
        .bind(&op.source_url)
        .bind(&op.target_name)
        .bind(&op.target_url)
        .bind(op.direction)
        .bind(selection)
        .bind(op.status)
        .bind(i64::from(op.progress))
        .bind(&op.message)
        .bind(&op.error_message)
        .bind(op.conflict_state)
        .bind(op.outcome)
        .bind(items)
        .bind(op.created_at)
        .bind(op.started_at)
        .bind(op.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Writes the current state of an operation.
    ///
    /// ## Returns
    /// * `Err(NotFound)` - unknown id, or the stored row is already terminal
    pub async fn save(&self, op: &SyncOperation) -> DbResult<()> {
        let items =
            serde_json::to_string(&op.items).map_err(|e| DbError::invalid_data("items", e))?;

        let result = sqlx::query(
            r#"
            UPDATE sync_operations SET
                status = ?2,
                progress = MAX(progress, ?3),
                message = ?4,
                error_message = ?5,
                conflict_state = ?6,
                outcome = ?7,
                items = ?8,
                started_at = ?9,
                completed_at = ?10
            WHERE id = ?1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(&op.id)
        .bind(op.status)
        .bind(i64::from(op.progress))
        .bind(&op.message)
        .bind(&op.error_message)
        .bind(op.conflict_state)
        .bind(op.outcome)
        .bind(items)
        .bind(op.started_at)
        .bind(op.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Active SyncOperation", &op.id));
        }
        Ok(())
    }

    /// Fails every operation still `pending` or `running`.
    ///
    /// Run tasks and their resolution gates live in memory, so after a
    /// restart nothing can finish these records. A held push is marked
    /// discarded. Terminal rows are left alone. Returns how many rows moved.
    pub async fn fail_unfinished(&self, error: &str) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sync_operations SET
                status = 'failed',
                outcome = 'failed',
                error_message = ?1,
                message = 'Failed: ' || ?1,
                conflict_state = CASE conflict_state
                    WHEN 'awaiting_resolution' THEN 'discarded'
                    ELSE conflict_state
                END,
                completed_at = ?2
            WHERE status IN ('pending', 'running')
            "#,
        )
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Gets an operation by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<SyncOperation>> {
        let row: Option<OperationRow> = sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SyncOperation::try_from).transpose()
    }

    /// Gets an operation by id, failing with `NotFound`.
    pub async fn find(&self, id: &str) -> DbResult<SyncOperation> {
        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("SyncOperation", id))
    }

    /// Most recent operations first.
    pub async fn list_recent(&self, limit: u32) -> DbResult<Vec<SyncOperation>> {
        let rows: Vec<OperationRow> = sqlx::query_as(&format!(
            "{} ORDER BY created_at DESC LIMIT ?1",
            SELECT_COLUMNS
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncOperation::try_from).collect()
    }

    /// Number of stored operations.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_operations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use envsync_core::{ComponentKind, ComponentSelection, Environment, TransportKind};

    use crate::{Database, DbConfig};

    use super::*;

    fn new_operation() -> SyncOperation {
        SyncOperation::new(
            &Environment::new("local", "http://local.test", "admin", "a"),
            &Environment::new("live", "http://live.test", "admin", "b"),
            Direction::Push,
            ComponentSelection::default().with_extension("seo").with_table("posts"),
        )
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.operations();
        let op = new_operation();

        repo.insert(&op).await.unwrap();
        let stored = repo.find(&op.id).await.unwrap();

        assert_eq!(stored.status, OperationStatus::Pending);
        assert_eq!(stored.selection, op.selection);
        assert_eq!(stored.direction, Direction::Push);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_save_tracks_state_machine() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.operations();
        let mut op = new_operation();
        repo.insert(&op).await.unwrap();

        op.start().unwrap();
        op.advance(40, "extensions done").unwrap();
        op.record_item(ItemResult::succeeded(
            ComponentKind::Extension,
            "seo",
            "installed",
            TransportKind::Local,
        ))
        .unwrap();
        repo.save(&op).await.unwrap();

        let stored = repo.find(&op.id).await.unwrap();
        assert_eq!(stored.status, OperationStatus::Running);
        assert_eq!(stored.progress, 40);
        assert_eq!(stored.items.len(), 1);
        assert!(stored.started_at.is_some());
    }

    #[tokio::test]
    async fn test_stored_progress_never_decreases() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.operations();
        let mut op = new_operation();
        repo.insert(&op).await.unwrap();

        op.start().unwrap();
        op.advance(55, "themes").unwrap();
        repo.save(&op).await.unwrap();

        let mut stale = op.clone();
        stale.progress = 20;
        repo.save(&stale).await.unwrap();

        assert_eq!(repo.find(&op.id).await.unwrap().progress, 55);
    }

    #[tokio::test]
    async fn test_terminal_rows_are_immutable() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.operations();
        let mut op = new_operation();
        repo.insert(&op).await.unwrap();

        op.start().unwrap();
        op.fail("target unreachable").unwrap();
        repo.save(&op).await.unwrap();

        let stored = repo.find(&op.id).await.unwrap();
        assert_eq!(stored.status, OperationStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("target unreachable"));
        assert_eq!(stored.outcome, Some(Outcome::Failed));

        let err = repo.save(&op).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_failed_without_message_rejected_by_schema() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.operations();
        let mut op = new_operation();
        repo.insert(&op).await.unwrap();

        op.status = OperationStatus::Failed;
        op.error_message = None;
        let err = repo.save(&op).await.unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_fail_unfinished_only_touches_active_rows() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.operations();

        let pending = new_operation();
        repo.insert(&pending).await.unwrap();

        let mut held = new_operation();
        repo.insert(&held).await.unwrap();
        held.start().unwrap();
        held.set_conflict_state(ConflictState::AwaitingResolution).unwrap();
        repo.save(&held).await.unwrap();

        let mut done = new_operation();
        repo.insert(&done).await.unwrap();
        done.start().unwrap();
        done.complete().unwrap();
        repo.save(&done).await.unwrap();

        assert_eq!(repo.fail_unfinished("interrupted").await.unwrap(), 2);

        for id in [&pending.id, &held.id] {
            let stored = repo.find(id).await.unwrap();
            assert_eq!(stored.status, OperationStatus::Failed);
            assert_eq!(stored.outcome, Some(Outcome::Failed));
            assert_eq!(stored.error_message.as_deref(), Some("interrupted"));
            assert!(stored.completed_at.is_some());
        }
        let held = repo.find(&held.id).await.unwrap();
        assert_eq!(held.conflict_state, ConflictState::Discarded);

        let done = repo.find(&done.id).await.unwrap();
        assert_eq!(done.status, OperationStatus::Completed);
        assert!(done.error_message.is_none());

        assert_eq!(repo.fail_unfinished("again").await.unwrap(), 0);
        let stored = repo.find(&pending.id).await.unwrap();
        assert_eq!(stored.error_message.as_deref(), Some("interrupted"));
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.operations().get("missing").await.unwrap().is_none());
        assert!(db.operations().find("missing").await.unwrap_err().is_not_found());
    }
}
