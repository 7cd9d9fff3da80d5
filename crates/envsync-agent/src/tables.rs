//! # Table Dumps
//!
//! Export of one table as structure plus literal rows, and statement-by-
//! statement application on the receiving side.
//!
//! ```text
//! dump_table("posts")
//!   sqlite_master        ──► structure   CREATE TABLE posts (...)
//!   PRAGMA table_info    ──► columns, primary_key
//!   SELECT quote(col)... ──► rows        [["1", "'Hello'"], ...]
//!
//! apply_dump(dump, replace)
//!   BEGIN
//!     [DROP TABLE IF EXISTS]            replace only
//!     CREATE TABLE IF NOT EXISTS ...
//!     INSERT OR REPLACE ... (one per row)
//!   COMMIT        ◄── any failing statement rolls the whole table back
//! ```
//!
//! Rows are read at export time without a snapshot boundary; a table written
//! to during the export may come out slightly inconsistent.

use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use envsync_core::payload::{delete_statement, quote_ident};
use envsync_core::{ApplyReport, TableDump};

use crate::error::{AgentError, AgentResult};
use crate::site::is_internal_table;

fn ensure_content_table(table: &str) -> AgentResult<()> {
    if table.trim().is_empty() {
        return Err(AgentError::InvalidRequest("table name is empty".into()));
    }
    if is_internal_table(table) {
        return Err(AgentError::InvalidRequest(format!(
            "'{}' is an internal table and cannot be synchronized",
            table
        )));
    }
    Ok(())
}

/// Dumps one table. A missing table yields a dump without structure.
pub async fn dump_table(pool: &SqlitePool, table: &str) -> AgentResult<TableDump> {
    ensure_content_table(table)?;

    let structure: Option<String> =
        sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(table)
            .fetch_optional(pool)
            .await?;

    let Some(structure) = structure else {
        debug!(table = %table, "Table does not exist");
        return Ok(TableDump {
            table: table.to_string(),
            ..Default::default()
        });
    };

    let info = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)))
        .fetch_all(pool)
        .await?;

    let mut columns = Vec::with_capacity(info.len());
    let mut keyed: Vec<(i64, String)> = Vec::new();
    for row in &info {
        let name: String = row.try_get("name")?;
        let pk: i64 = row.try_get("pk")?;
        if pk > 0 {
            keyed.push((pk, name.clone()));
        }
        columns.push(name);
    }
    keyed.sort();
    let primary_key: Vec<String> = keyed.into_iter().map(|(_, name)| name).collect();

    let mut dump = TableDump {
        table: table.to_string(),
        structure: Some(structure),
        columns,
        primary_key,
        rows: Vec::new(),
    };

    if dump.columns.is_empty() {
        return Ok(dump);
    }

    let select: Vec<String> = dump
        .columns
        .iter()
        .map(|c| format!("quote({})", quote_ident(c)))
        .collect();
    let order: Vec<String> = dump.key_columns().iter().map(|c| quote_ident(c)).collect();
    let sql = format!(
        "SELECT {} FROM {} ORDER BY {}",
        select.join(", "),
        quote_ident(table),
        order.join(", ")
    );

    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    dump.rows = rows
        .iter()
        .map(|row| {
            (0..dump.columns.len())
                .map(|i| row.try_get::<String, _>(i))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!(table = %table, rows = dump.rows.len(), "Dumped table");
    Ok(dump)
}

/// Applies a dump. Any failing statement aborts the import of that table.
pub async fn apply_dump(pool: &SqlitePool, dump: &TableDump, replace: bool) -> AgentResult<ApplyReport> {
    ensure_content_table(&dump.table)?;
    if !dump.exists() && !dump.rows.is_empty() {
        return Err(AgentError::InvalidRequest(format!(
            "dump of '{}' carries rows but no structure",
            dump.table
        )));
    }

    let statements = dump.statements(replace);
    execute_all(pool, &dump.table, &statements).await?;

    Ok(ApplyReport {
        statements: statements.len(),
        rows: dump.rows.len(),
        ..Default::default()
    })
}

/// Deletes rows identified by key literals.
pub async fn delete_rows(
    pool: &SqlitePool,
    table: &str,
    key_columns: &[String],
    keys: &[Vec<String>],
) -> AgentResult<ApplyReport> {
    ensure_content_table(table)?;
    if key_columns.is_empty() {
        return Err(AgentError::InvalidRequest("no key columns given".into()));
    }
    if let Some(bad) = keys.iter().find(|k| k.len() != key_columns.len()) {
        return Err(AgentError::InvalidRequest(format!(
            "key {:?} does not match key columns {:?}",
            bad, key_columns
        )));
    }

    let statements: Vec<String> = keys
        .iter()
        .map(|key| delete_statement(table, key_columns, key))
        .collect();
    let affected = execute_all(pool, table, &statements).await?;

    Ok(ApplyReport {
        statements: statements.len(),
        rows: affected as usize,
        ..Default::default()
    })
}

/// Runs statements in one transaction, returning the rows affected.
async fn execute_all(pool: &SqlitePool, table: &str, statements: &[String]) -> AgentResult<u64> {
    let mut tx = pool.begin().await?;
    let mut affected = 0;

    for (index, statement) in statements.iter().enumerate() {
        match sqlx::query(statement)
            .persistent(false)
            .execute(&mut *tx)
            .await
        {
            Ok(result) => affected += result.rows_affected(),
            Err(e) => {
                warn!(table = %table, index, error = %e, "Statement failed, rolling back table");
                return Err(AgentError::Statement {
                    table: table.to_string(),
                    index,
                    message: e.to_string(),
                });
            }
        }
    }

    tx.commit().await?;
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use crate::site::Site;

    use super::*;

    async fn site_with_posts() -> (tempfile::TempDir, Site) {
        let dir = tempfile::tempdir().unwrap();
        let site = Site::open(dir.path()).await.unwrap();
        for sql in [
            "CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT, body TEXT)",
            "INSERT INTO posts VALUES (2, 'Second', NULL)",
            "INSERT INTO posts VALUES (1, 'It''s first', 'x')",
        ] {
            sqlx::query(sql).execute(site.pool()).await.unwrap();
        }
        (dir, site)
    }

    #[tokio::test]
    async fn test_dump_uses_literals_in_key_order() {
        let (_dir, site) = site_with_posts().await;
        let dump = dump_table(site.pool(), "posts").await.unwrap();

        assert!(dump.exists());
        assert_eq!(dump.columns, vec!["id", "title", "body"]);
        assert_eq!(dump.primary_key, vec!["id"]);
        assert_eq!(dump.rows[0], vec!["1", "'It''s first'", "'x'"]);
        assert_eq!(dump.rows[1], vec!["2", "'Second'", "NULL"]);
    }

    #[tokio::test]
    async fn test_missing_table_dump_is_empty() {
        let (_dir, site) = site_with_posts().await;
        let dump = dump_table(site.pool(), "comments").await.unwrap();
        assert!(!dump.exists());
        assert!(dump.rows.is_empty());
    }

    #[tokio::test]
    async fn test_internal_tables_refused() {
        let (_dir, site) = site_with_posts().await;
        let err = dump_table(site.pool(), "agent_tokens").await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_apply_into_other_site() {
        let (_a, source) = site_with_posts().await;
        let dump = dump_table(source.pool(), "posts").await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let target = Site::open(dir.path()).await.unwrap();
        let report = apply_dump(target.pool(), &dump, false).await.unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(report.statements, 3);

        let copied = dump_table(target.pool(), "posts").await.unwrap();
        assert_eq!(copied.rows, dump.rows);
    }

    #[tokio::test]
    async fn test_replace_drops_extra_rows() {
        let (_dir, site) = site_with_posts().await;
        let dump = dump_table(site.pool(), "posts").await.unwrap();
        let first_only = dump.with_rows(vec![dump.rows[0].clone()]);

        apply_dump(site.pool(), &first_only, true).await.unwrap();
        let after = dump_table(site.pool(), "posts").await.unwrap();
        assert_eq!(after.rows.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_statement_rolls_back_table() {
        let (_dir, site) = site_with_posts().await;
        let mut dump = dump_table(site.pool(), "posts").await.unwrap();
        dump.rows = vec![
            vec!["3".into(), "'ok'".into(), "NULL".into()],
            vec!["4".into(), "'broken'".into()],
        ];

        let err = apply_dump(site.pool(), &dump, false).await.unwrap_err();
        match err {
            AgentError::Statement { table, index, .. } => {
                assert_eq!(table, "posts");
                assert_eq!(index, 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let after = dump_table(site.pool(), "posts").await.unwrap();
        assert_eq!(after.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_rows() {
        let (_dir, site) = site_with_posts().await;
        let report = delete_rows(
            site.pool(),
            "posts",
            &["id".to_string()],
            &[vec!["2".to_string()]],
        )
        .await
        .unwrap();
        assert_eq!(report.rows, 1);

        let after = dump_table(site.pool(), "posts").await.unwrap();
        assert_eq!(after.rows.len(), 1);
        assert_eq!(after.rows[0][0], "1");
    }
}
