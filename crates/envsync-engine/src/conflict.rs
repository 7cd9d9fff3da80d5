//! # Database Conflicts
//!
//! Coarse divergence detection for a pushed table, and application of the
//! operator's resolution for each group.
//!
//! ```text
//! source rows ──┐
//!               ├── keyed by primary key (all columns without one)
//! target rows ──┘
//!
//!   key only on source            ──► NewRowGroup      (target side empty)
//!   key on both, values differ    ──► UpdatedRowGroup  (both sides kept)
//!   key only on target            ──► not a conflict, push never deletes
//! ```
//!
//! ## Resolutions
//! ```text
//! ┌──────────┬──────────────────────────────┬──────────────────────────────┐
//! │          │ NewRowGroup                  │ UpdatedRowGroup              │
//! ├──────────┼──────────────────────────────┼──────────────────────────────┤
//! │ push     │ insert source rows on target │ source rows replace target's │
//! │ pull     │ delete the rows on source    │ target rows replace source's │
//! │ skip     │ nothing                      │ nothing                      │
//! └──────────┴──────────────────────────────┴──────────────────────────────┘
//! ```

use std::collections::HashMap;

use tracing::debug;

use envsync_core::{
    Conflict, ConflictKind, ConflictRows, CoreError, Resolution, TableDump, TransferPayload,
};

use crate::error::SyncResult;
use crate::transport::TransportStrategy;

/// Compares the two sides of a table. A target without the table has no
/// conflicts; it is simply created.
pub fn detect(operation_id: &str, source: &TableDump, target: &TableDump) -> Vec<Conflict> {
    if !target.exists() {
        return Vec::new();
    }

    let on_target: HashMap<Vec<String>, &Vec<String>> = target
        .rows
        .iter()
        .map(|row| (target.row_key(row), row))
        .collect();

    let mut new_rows = Vec::new();
    let mut updated_source = Vec::new();
    let mut updated_target = Vec::new();

    for row in &source.rows {
        match on_target.get(&source.row_key(row)) {
            None => new_rows.push(row.clone()),
            Some(existing) if *existing != row => {
                updated_source.push(row.clone());
                updated_target.push((*existing).clone());
            }
            Some(_) => {}
        }
    }

    let mut conflicts = Vec::new();
    if !new_rows.is_empty() {
        conflicts.push(Conflict::new(
            operation_id,
            ConflictKind::NewRowGroup,
            &source.table,
            ConflictRows {
                source: source.with_rows(new_rows),
                target: target.with_rows(Vec::new()),
            },
        ));
    }
    if !updated_source.is_empty() {
        conflicts.push(Conflict::new(
            operation_id,
            ConflictKind::UpdatedRowGroup,
            &source.table,
            ConflictRows {
                source: source.with_rows(updated_source),
                target: target.with_rows(updated_target),
            },
        ));
    }

    debug!(table = %source.table, conflicts = conflicts.len(), "Compared table");
    conflicts
}

/// Carries out one resolved conflict and describes what happened.
pub async fn apply_resolution(
    conflict: &Conflict,
    source: &dyn TransportStrategy,
    target: &dyn TransportStrategy,
) -> SyncResult<String> {
    let rows = &conflict.rows;

    match (conflict.resolution, conflict.kind) {
        (Resolution::Unset, _) => Err(CoreError::UnresolvedConflict(conflict.id.clone()).into()),

        (Resolution::Skip, _) => Ok(format!("{}: skipped", conflict.kind)),

        (Resolution::Push, _) => {
            let report = target
                .send_object(TransferPayload::table(rows.source.clone(), false))
                .await?;
            Ok(format!("{}: pushed {} row(s)", conflict.kind, report.rows))
        }

        (Resolution::Pull, ConflictKind::UpdatedRowGroup) => {
            let report = source
                .send_object(TransferPayload::table(rows.target.clone(), false))
                .await?;
            Ok(format!("{}: pulled {} row(s)", conflict.kind, report.rows))
        }

        (Resolution::Pull, ConflictKind::NewRowGroup) => {
            let keys: Vec<Vec<String>> = rows
                .source
                .rows
                .iter()
                .map(|row| rows.source.row_key(row))
                .collect();
            let report = source
                .delete_rows(&conflict.table, rows.source.key_columns(), keys)
                .await?;
            Ok(format!("{}: removed {} row(s) from source", conflict.kind, report.rows))
        }
    }
}
