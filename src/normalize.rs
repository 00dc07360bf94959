// 🔤 Schema Normalizer - source field names → canonical vocabulary

use crate::error::{PipelineError, PipelineResult};
use crate::table::Table;
use std::collections::BTreeMap;

/// Original field name → canonical field name, for one source
pub type RenameTable = BTreeMap<String, String>;

/// Rename every mapped column; unmapped columns pass through unchanged.
///
/// Fails only when the renames would leave two columns with the same name.
pub fn normalize(table: &Table, renames: &RenameTable) -> PipelineResult<Table> {
    let mut normalized = table.clone();

    for (idx, column) in table.columns().iter().enumerate() {
        if let Some(canonical) = renames.get(column) {
            normalized.rename_column(idx, canonical.clone());
        }
    }

    let columns = normalized.columns();
    for (idx, column) in columns.iter().enumerate() {
        if columns[..idx].contains(column) {
            return Err(PipelineError::Normalize {
                source_name: table.source().to_string(),
                message: format!("renaming produces duplicate column '{}'", column),
            });
        }
    }

    Ok(normalized)
}
