//! # Conflicts
//!
//! Divergences between source and target rows found while preparing a
//! database push.
//!
//! ## Resolution Semantics
//! ```text
//! ┌──────────────────┬─────────────────────────┬──────────────────────────┐
//! │ kind             │ push                    │ pull                     │
//! ├──────────────────┼─────────────────────────┼──────────────────────────┤
//! │ new_row_group    │ insert rows on target   │ delete rows from source  │
//! │ updated_row_group│ overwrite target rows   │ copy target rows back    │
//! │                  │ with source values      │ onto the source          │
//! └──────────────────┴─────────────────────────┴──────────────────────────┘
//!   skip: leave both sides unchanged       unset: blocks the operation
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::payload::TableDump;

/// Which coarse divergence a conflict represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Rows present on the push source but absent on the target.
    NewRowGroup,
    /// Rows present on both sides with different values.
    UpdatedRowGroup,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::NewRowGroup => "new_row_group",
            ConflictKind::UpdatedRowGroup => "updated_row_group",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator decision for one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    #[default]
    Unset,
    Push,
    Pull,
    Skip,
}

impl Resolution {
    pub fn is_set(&self) -> bool {
        *self != Resolution::Unset
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Unset => "unset",
            Resolution::Push => "push",
            Resolution::Pull => "pull",
            Resolution::Skip => "skip",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Resolution {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unset" => Ok(Resolution::Unset),
            "push" => Ok(Resolution::Push),
            "pull" => Ok(Resolution::Pull),
            "skip" => Ok(Resolution::Skip),
            _ => Err(ValidationError::NotAllowed {
                field: "resolution".to_string(),
                allowed: vec!["push".into(), "pull".into(), "skip".into()],
            }),
        }
    }
}

/// The rows a conflict covers, as captured at detection time.
///
/// Both dumps carry the table structure; `source` holds the push source's
/// version of the rows and `target` the target's (empty for new rows).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRows {
    pub source: TableDump,
    pub target: TableDump,
}

/// One group of divergent rows awaiting an operator decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: String,
    pub operation_id: String,
    /// Position in the operation's conflict list; resolutions apply in this order.
    pub position: u32,
    pub kind: ConflictKind,
    pub table: String,
    pub row_count: u32,
    pub description: String,
    pub resolution: Resolution,
    pub rows: ConflictRows,
}

impl Conflict {
    pub fn new(operation_id: &str, kind: ConflictKind, table: &str, rows: ConflictRows) -> Self {
        let row_count = rows.source.rows.len() as u32;
        let description = match kind {
            ConflictKind::NewRowGroup => format!(
                "{} row(s) in '{}' exist on the source but not on the target",
                row_count, table
            ),
            ConflictKind::UpdatedRowGroup => format!(
                "{} row(s) in '{}' differ between source and target",
                row_count, table
            ),
        };

        Conflict {
            id: Uuid::new_v4().to_string(),
            operation_id: operation_id.to_string(),
            position: 0,
            kind,
            table: table.to_string(),
            row_count,
            description,
            resolution: Resolution::Unset,
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_parsing() {
        assert_eq!("push".parse::<Resolution>().unwrap(), Resolution::Push);
        assert_eq!("SKIP".parse::<Resolution>().unwrap(), Resolution::Skip);
        assert!("merge".parse::<Resolution>().is_err());
        assert!(!Resolution::Unset.is_set());
        assert!(Resolution::Pull.is_set());
    }

    #[test]
    fn test_new_conflict_is_unset() {
        let rows = ConflictRows {
            source: TableDump {
                table: "posts".into(),
                rows: vec![vec!["1".into()], vec!["2".into()]],
                ..Default::default()
            },
            target: TableDump::default(),
        };
        let conflict = Conflict::new("op-1", ConflictKind::NewRowGroup, "posts", rows);

        assert_eq!(conflict.resolution, Resolution::Unset);
        assert_eq!(conflict.row_count, 2);
        assert!(conflict.description.contains("posts"));
    }

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&ConflictKind::UpdatedRowGroup).unwrap();
        assert_eq!(json, r#""updated_row_group""#);
    }
}
