//! # Media Library
//!
//! Export of every media record with its files and attached entries, and
//! idempotent import: records and entries whose identifier already exists
//! are left untouched, so applying the same bundle twice changes nothing
//! the second time.

use std::collections::BTreeMap;

use sqlx::FromRow;
use tracing::{debug, info};

use envsync_core::{ApplyReport, MediaBundle, MediaMeta, MediaRecord};

use crate::archive::{self, UnpackMode};
use crate::error::AgentResult;
use crate::site::Site;

#[derive(Debug, FromRow)]
struct MediaRow {
    id: i64,
    path: String,
    title: String,
    mime_type: String,
}

#[derive(Debug, FromRow)]
struct MetaRow {
    meta_id: i64,
    media_id: i64,
    meta_key: String,
    meta_value: String,
}

/// Builds the bundle of the whole media library.
pub async fn export_bundle(site: &Site) -> AgentResult<MediaBundle> {
    let media: Vec<MediaRow> =
        sqlx::query_as("SELECT id, path, title, mime_type FROM media ORDER BY id")
            .fetch_all(site.pool())
            .await?;
    let meta: Vec<MetaRow> = sqlx::query_as(
        "SELECT meta_id, media_id, meta_key, meta_value FROM media_meta ORDER BY meta_id",
    )
    .fetch_all(site.pool())
    .await?;

    let mut attached: BTreeMap<i64, Vec<MediaMeta>> = BTreeMap::new();
    for row in meta {
        attached.entry(row.media_id).or_default().push(MediaMeta {
            meta_id: row.meta_id,
            key: row.meta_key,
            value: row.meta_value,
        });
    }

    let records: Vec<MediaRecord> = media
        .into_iter()
        .map(|row| MediaRecord {
            meta: attached.remove(&row.id).unwrap_or_default(),
            id: row.id,
            path: row.path,
            title: row.title,
            mime_type: row.mime_type,
        })
        .collect();

    let paths = records.iter().map(|r| r.path.clone()).collect();
    let archive = archive::pack_files_blocking(site.uploads_dir(), paths).await?;

    debug!(records = records.len(), bytes = archive.len(), "Exported media bundle");
    Ok(MediaBundle { archive, records })
}

/// Unpacks the files and inserts records and entries that don't exist yet.
pub async fn apply_bundle(site: &Site, bundle: &MediaBundle) -> AgentResult<ApplyReport> {
    let mut report = ApplyReport::default();

    if !bundle.archive.is_empty() {
        report.files =
            archive::unpack_blocking(bundle.archive.clone(), site.uploads_dir(), UnpackMode::Merge)
                .await?;
    }

    let mut tx = site.pool().begin().await?;
    for record in &bundle.records {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO media (id, path, title, mime_type) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(record.id)
        .bind(&record.path)
        .bind(&record.title)
        .bind(&record.mime_type)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        report.statements += 1;
        if inserted > 0 {
            report.rows += 1;
        } else {
            report.skipped += 1;
        }

        for entry in &record.meta {
            let inserted = sqlx::query(
                "INSERT OR IGNORE INTO media_meta (meta_id, media_id, meta_key, meta_value)
                 SELECT ?1, ?2, ?3, ?4 WHERE EXISTS (SELECT 1 FROM media WHERE id = ?2)",
            )
            .bind(entry.meta_id)
            .bind(record.id)
            .bind(&entry.key)
            .bind(&entry.value)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            report.statements += 1;
            if inserted > 0 {
                report.rows += 1;
            } else {
                report.skipped += 1;
            }
        }
    }
    tx.commit().await?;

    info!(
        inserted = report.rows,
        skipped = report.skipped,
        files = report.files,
        "Applied media bundle"
    );
    Ok(report)
}
