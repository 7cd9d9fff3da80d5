//! # Transfer Payloads
//!
//! The unit moved between installations by a transport.
//!
//! ## Payload Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       TransferPayload                                   │
//! │                                                                         │
//! │  kind + name ──► body                                                  │
//! │                   │                                                     │
//! │                   ├── Archive  gzip'd tar of an extension/theme tree   │
//! │                   │            (base64 URL-safe inside JSON)           │
//! │                   │                                                     │
//! │                   ├── Table    TableDump: structure statement +        │
//! │                   │            one literal row per data statement      │
//! │                   │                                                     │
//! │                   └── Media    archive keyed by storage-relative path  │
//! │                                + records with attached key/values      │
//! │                                                                         │
//! │  Payloads are transient: both ends drop them once applied.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Table rows are kept as SQLite literals (the output of `quote()`), so a
//! dump renders to statements without any type mapping and two dumps of the
//! same table can be compared value by value.

use serde::{Deserialize, Serialize};

use crate::types::ComponentKind;

// =============================================================================
// Payload
// =============================================================================

/// One component's content in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPayload {
    pub kind: ComponentKind,
    pub name: String,
    pub body: PayloadBody,
}

/// Payload content by component kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum PayloadBody {
    /// Extension or theme directory tree.
    Archive {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// One table's statement stream.
    ///
    /// With `replace` the receiving side drops its copy of the table first.
    Table { dump: TableDump, replace: bool },
    /// The media library.
    Media { bundle: MediaBundle },
}

impl TransferPayload {
    pub fn archive(kind: ComponentKind, name: &str, data: Vec<u8>) -> Self {
        TransferPayload {
            kind,
            name: name.to_string(),
            body: PayloadBody::Archive { data },
        }
    }

    pub fn table(dump: TableDump, replace: bool) -> Self {
        TransferPayload {
            kind: ComponentKind::Table,
            name: dump.table.clone(),
            body: PayloadBody::Table { dump, replace },
        }
    }

    pub fn media(bundle: MediaBundle) -> Self {
        TransferPayload {
            kind: ComponentKind::Media,
            name: crate::MEDIA_ITEM_NAME.to_string(),
            body: PayloadBody::Media { bundle },
        }
    }

    /// Size of the binary part, for logging.
    pub fn binary_len(&self) -> usize {
        match &self.body {
            PayloadBody::Archive { data } => data.len(),
            PayloadBody::Media { bundle } => bundle.archive.len(),
            PayloadBody::Table { .. } => 0,
        }
    }
}

/// Asks an installation to export one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub kind: ComponentKind,
    pub name: String,
}

impl FetchRequest {
    pub fn new(kind: ComponentKind, name: &str) -> Self {
        FetchRequest {
            kind,
            name: name.to_string(),
        }
    }
}

/// What the receiving side did with a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    /// SQL statements executed.
    pub statements: usize,
    /// Rows inserted (media records count here too).
    pub rows: usize,
    /// Rows already present and left untouched.
    pub skipped: usize,
    /// Files written.
    pub files: usize,
}

// =============================================================================
// Table Dump
// =============================================================================

/// Structure plus current rows of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDump {
    pub table: String,
    /// The `CREATE TABLE` statement. `None` when the table does not exist.
    pub structure: Option<String>,
    pub columns: Vec<String>,
    /// Primary key columns in key order. Empty for tables without one.
    pub primary_key: Vec<String>,
    /// One entry per row, values as SQL literals in `columns` order.
    pub rows: Vec<Vec<String>>,
}

impl TableDump {
    pub fn exists(&self) -> bool {
        self.structure.is_some()
    }

    /// Column positions identifying a row: the primary key, or every column.
    pub fn key_indices(&self) -> Vec<usize> {
        let key: Vec<usize> = self
            .primary_key
            .iter()
            .filter_map(|pk| self.columns.iter().position(|c| c == pk))
            .collect();
        if key.is_empty() {
            (0..self.columns.len()).collect()
        } else {
            key
        }
    }

    /// Names of the columns returned by [`key_indices`](Self::key_indices).
    pub fn key_columns(&self) -> Vec<String> {
        self.key_indices()
            .into_iter()
            .map(|i| self.columns[i].clone())
            .collect()
    }

    /// Key literals of one row.
    pub fn row_key(&self, row: &[String]) -> Vec<String> {
        self.key_indices()
            .into_iter()
            .filter_map(|i| row.get(i).cloned())
            .collect()
    }

    /// A copy with the same structure and only `rows`.
    pub fn with_rows(&self, rows: Vec<Vec<String>>) -> TableDump {
        TableDump {
            table: self.table.clone(),
            structure: self.structure.clone(),
            columns: self.columns.clone(),
            primary_key: self.primary_key.clone(),
            rows,
        }
    }

    /// Structure statement safe to run against a database that may already
    /// have the table.
    pub fn structure_statement(&self) -> Option<String> {
        self.structure.as_deref().map(idempotent_create)
    }

    pub fn insert_statement(&self, row: &[String]) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote_ident(&self.table),
            columns.join(", "),
            row.join(", ")
        )
    }

    /// Full statement stream, in execution order.
    pub fn statements(&self, replace: bool) -> Vec<String> {
        let mut statements = Vec::with_capacity(self.rows.len() + 2);
        if replace {
            statements.push(format!("DROP TABLE IF EXISTS {}", quote_ident(&self.table)));
        }
        if let Some(structure) = self.structure_statement() {
            statements.push(structure);
        }
        statements.extend(self.rows.iter().map(|row| self.insert_statement(row)));
        statements
    }
}

/// `DELETE` for one row identified by its key literals.
pub fn delete_statement(table: &str, key_columns: &[String], key: &[String]) -> String {
    let predicate: Vec<String> = key_columns
        .iter()
        .zip(key)
        .map(|(column, value)| format!("{} IS {}", quote_ident(column), value))
        .collect();
    format!(
        "DELETE FROM {} WHERE {}",
        quote_ident(table),
        predicate.join(" AND ")
    )
}

/// Quotes an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn idempotent_create(sql: &str) -> String {
    const CREATE: &str = "CREATE TABLE";
    let trimmed = sql.trim();
    let upper = trimmed.to_ascii_uppercase();
    if upper.starts_with("CREATE TABLE IF NOT EXISTS") || !upper.starts_with(CREATE) {
        trimmed.to_string()
    } else {
        format!("CREATE TABLE IF NOT EXISTS{}", &trimmed[CREATE.len()..])
    }
}

// =============================================================================
// Media Bundle
// =============================================================================

/// The media library: files plus their metadata rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBundle {
    /// gzip'd tar, entries named by `MediaRecord::path`.
    #[serde(with = "base64_bytes")]
    pub archive: Vec<u8>,
    pub records: Vec<MediaRecord>,
}

/// One media record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    /// Primary identifier; apply skips records whose id already exists.
    pub id: i64,
    /// Storage-relative path under the uploads root.
    pub path: String,
    pub title: String,
    pub mime_type: String,
    #[serde(default)]
    pub meta: Vec<MediaMeta>,
}

/// Key/value entry attached to a media record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMeta {
    pub meta_id: i64,
    pub key: String,
    pub value: String,
}

// =============================================================================
// Base64 (URL-safe) serde adapter
// =============================================================================

mod base64_bytes {
    use base64::engine::general_purpose::URL_SAFE;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(bytes: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&URL_SAFE.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        URL_SAFE
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
