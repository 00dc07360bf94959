// 📤 Unified Export - the unified table as CSV, columns in table order

use crate::error::{PipelineError, PipelineResult};
use crate::table::{render_value, Table};
use std::path::Path;

pub fn write_csv(table: &Table, path: &Path) -> PipelineResult<()> {
    let fail = |e: csv::Error| PipelineError::Export(format!("{}: {}", path.display(), e));

    let mut writer = csv::Writer::from_path(path).map_err(fail)?;
    writer.write_record(table.columns()).map_err(fail)?;

    for row in table.rows() {
        writer
            .write_record(row.iter().map(render_value))
            .map_err(fail)?;
    }

    writer
        .flush()
        .map_err(|e| PipelineError::Export(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_export_preserves_column_order_and_values() {
        let table = Table::from_rows(
            "csv+xml+json",
            vec![
                "first_name".to_string(),
                "last_name".to_string(),
                "full_name".to_string(),
                "retired".to_string(),
                "commute_distance".to_string(),
            ],
            vec![vec![json!("Jane"), json!("Doe"), json!("Jane Doe"), json!(false), Value::Null]],
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unified.csv");

        write_csv(&table, &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "first_name,last_name,full_name,retired,commute_distance\nJane,Doe,Jane Doe,False,\n"
        );
    }

    #[test]
    fn test_export_to_missing_directory_fails() {
        let table = Table::new("csv", vec!["a".to_string()]);
        let err = write_csv(&table, Path::new("/nonexistent/dir/out.csv")).unwrap_err();
        assert_eq!(err.stage(), "export");
    }
}
