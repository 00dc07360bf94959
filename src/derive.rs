// 🧩 Derived Fields - full_name built from first_name + last_name

use crate::error::{PipelineError, PipelineResult};
use crate::table::Table;
use serde_json::Value;

pub const FULL_NAME: &str = "full_name";

/// Add `full_name = first_name + " " + last_name` and lead the schema with
/// `first_name, last_name, full_name`, the rest keeping their order.
///
/// A null name part gives a null full_name. An existing full_name column is
/// recomputed, not duplicated.
pub fn derive_full_name(table: &Table) -> PipelineResult<Table> {
    let first = table
        .column_index("first_name")
        .ok_or_else(|| PipelineError::Derive("column 'first_name' missing".to_string()))?;
    let last = table
        .column_index("last_name")
        .ok_or_else(|| PipelineError::Derive("column 'last_name' missing".to_string()))?;

    let mut derived = table.clone();
    let full = match derived.column_index(FULL_NAME) {
        Some(idx) => {
            for row in 0..derived.len() {
                let value = full_name_of(&derived.rows()[row], first, last);
                derived.set(row, idx, value);
            }
            idx
        }
        None => {
            derived.add_column(FULL_NAME, |row| full_name_of(row, first, last));
            derived.columns().len() - 1
        }
    };

    let lead = [first, last, full];
    let order: Vec<usize> = lead
        .iter()
        .copied()
        .chain((0..derived.columns().len()).filter(|i| !lead.contains(i)))
        .collect();

    Ok(derived.reorder(&order))
}

fn full_name_of(row: &[Value], first: usize, last: usize) -> Value {
    match (&row[first], &row[last]) {
        (Value::Null, _) | (_, Value::Null) => Value::Null,
        (a, b) => Value::String(format!("{} {}", as_text(a), as_text(b))),
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
