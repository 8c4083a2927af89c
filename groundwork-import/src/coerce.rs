//! CSV cell coercion
//!
//! Cells are never rejected: invalid UTF-8 is repaired lossily and values
//! that do not parse as their field type become NULL. Both cases are logged.

use groundwork_common::{FieldType, FieldValue};
use std::borrow::Cow;
use tracing::warn;

/// Where a cell came from, for log messages
#[derive(Debug, Clone, Copy)]
pub struct CellRef<'a> {
    pub file: &'a str,
    pub row: u64,
    pub column: &'a str,
}

/// Decode cell bytes, replacing invalid UTF-8 sequences
pub fn repair_utf8<'b>(bytes: &'b [u8], cell: CellRef<'_>) -> Cow<'b, str> {
    let text = String::from_utf8_lossy(bytes);
    if let Cow::Owned(_) = text {
        warn!(
            "{} row {} column '{}': invalid UTF-8 repaired",
            cell.file, cell.row, cell.column
        );
    }
    text
}

/// Coerce a cell to `field_type`
///
/// Empty cells are NULL. Temporal cells try the primary format first and
/// fall back to a numeric unix epoch.
pub fn coerce_cell(text: &str, field_type: FieldType, cell: CellRef<'_>) -> FieldValue {
    if text.trim().is_empty() {
        return FieldValue::Null;
    }

    match FieldValue::parse_text(text, field_type) {
        Some(value) => value,
        None => {
            warn!(
                "{} row {} column '{}': '{}' is not a valid {:?}, stored as NULL",
                cell.file, cell.row, cell.column, text, field_type
            );
            FieldValue::Null
        }
    }
}

/// Ids named by an association cell (`7` or `3|4|9`)
///
/// Unparseable entries are skipped with a warning.
pub fn parse_ids(text: &str, cell: CellRef<'_>) -> Vec<i64> {
    let mut ids = Vec::new();
    for part in text.split('|').map(str::trim).filter(|p| !p.is_empty()) {
        match part.parse::<i64>() {
            Ok(id) if !ids.contains(&id) => ids.push(id),
            Ok(_) => {}
            Err(_) => warn!(
                "{} row {} column '{}': '{}' is not an id, ignored",
                cell.file, cell.row, cell.column, part
            ),
        }
    }
    ids
}
