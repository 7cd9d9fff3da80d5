//! # Conflict Repository
//!
//! Persists the Conflicts of a database push so the operator can inspect
//! and resolve them while the operation waits.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use envsync_core::{Conflict, ConflictKind, ConflictRows, Resolution};

use crate::error::{DbError, DbResult};

#[derive(Debug, FromRow)]
struct ConflictRow {
    id: String,
    operation_id: String,
    position: i64,
    kind: ConflictKind,
    table_name: String,
    row_count: i64,
    description: String,
    resolution: Resolution,
    row_groups: String,
}

impl TryFrom<ConflictRow> for Conflict {
    type Error = DbError;

    fn try_from(row: ConflictRow) -> Result<Self, Self::Error> {
        let rows: ConflictRows = serde_json::from_str(&row.row_groups)
            .map_err(|e| DbError::invalid_data("row_groups", e))?;

        Ok(Conflict {
            id: row.id,
            operation_id: row.operation_id,
            position: row.position.max(0) as u32,
            kind: row.kind,
            table: row.table_name,
            row_count: row.row_count.max(0) as u32,
            description: row.description,
            resolution: row.resolution,
            rows,
        })
    }
}

/// Repository for database push conflicts.
#[derive(Debug, Clone)]
pub struct ConflictRepository {
    pool: SqlitePool,
}

impl ConflictRepository {
    /// Creates a new ConflictRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ConflictRepository { pool }
    }

    /// Stores the conflicts of one operation in a single transaction.
    ///
    /// Positions are taken from the slice order.
    pub async fn insert_all(&self, conflicts: &[Conflict]) -> DbResult<()> {
        let now: DateTime<Utc> = Utc::now();
        let mut tx = self.pool.begin().await?;

        for (position, conflict) in conflicts.iter().enumerate() {
            let row_groups = serde_json::to_string(&conflict.rows)
                .map_err(|e| DbError::invalid_data("row_groups", e))?;

            sqlx::query(
                r#"
                INSERT INTO sync_conflicts (
                    id, operation_id, position, kind, table_name, row_count,
                    description, resolution, row_groups, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(&conflict.id)
            .bind(&conflict.operation_id)
            .bind(position as i64)
            .bind(conflict.kind)
            .bind(&conflict.table)
            .bind(i64::from(conflict.row_count))
            .bind(&conflict.description)
            .bind(conflict.resolution)
            .bind(row_groups)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(count = conflicts.len(), "Stored conflicts");
        Ok(())
    }

    /// Conflicts of an operation in list order.
    pub async fn list(&self, operation_id: &str) -> DbResult<Vec<Conflict>> {
        let rows: Vec<ConflictRow> = sqlx::query_as(
            r#"
            SELECT id, operation_id, position, kind, table_name, row_count,
                   description, resolution, row_groups
            FROM sync_conflicts
            WHERE operation_id = ?1
            ORDER BY position ASC
            "#,
        )
        .bind(operation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Conflict::try_from).collect()
    }

    /// Records the operator's decision for one conflict of one operation.
    pub async fn set_resolution(
        &self,
        operation_id: &str,
        conflict_id: &str,
        resolution: Resolution,
    ) -> DbResult<()> {
        let resolved_at = resolution.is_set().then(Utc::now);

        let result = sqlx::query(
            r#"
            UPDATE sync_conflicts
            SET resolution = ?3, resolved_at = ?4
            WHERE operation_id = ?1 AND id = ?2
            "#,
        )
        .bind(operation_id)
        .bind(conflict_id)
        .bind(resolution)
        .bind(resolved_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Conflict", conflict_id));
        }
        Ok(())
    }

    /// Number of conflicts still `unset`.
    pub async fn unresolved_count(&self, operation_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_conflicts WHERE operation_id = ?1 AND resolution = 'unset'",
        )
        .bind(operation_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
