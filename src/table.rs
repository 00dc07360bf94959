// 📋 Table - the in-memory tabular structure every stage passes along
// Named columns, typed cells (serde_json::Value), Null = missing value

use serde_json::{Number, Value};

// ============================================================================
// TABLE
// ============================================================================

/// A named, ordered set of columns plus rows of typed cells.
///
/// Stages never mutate a table they were handed; they clone it into a new
/// one. Column order is kept exactly because it shows up in exports.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    source: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Create an empty table for a source
    pub fn new(source: impl Into<String>, columns: Vec<String>) -> Self {
        Table {
            source: source.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Create a table from already-built rows
    pub fn from_rows(
        source: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    ) -> Self {
        let mut table = Table::new(source, columns);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    /// Append a row; short rows are padded with Null, long rows truncated
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cell lookup by row index and column name
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Overwrite a cell by row and column index
    pub fn set(&mut self, row: usize, column: usize, value: Value) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(column)) {
            *cell = value;
        }
    }

    /// Rename a column in place (caller guarantees the new name is free)
    pub fn rename_column(&mut self, index: usize, name: impl Into<String>) {
        if let Some(col) = self.columns.get_mut(index) {
            *col = name.into();
        }
    }

    /// Append a column, every row receiving the value produced for it
    pub fn add_column<F>(&mut self, name: impl Into<String>, mut value_for: F)
    where
        F: FnMut(&[Value]) -> Value,
    {
        self.columns.push(name.into());
        for row in &mut self.rows {
            let value = value_for(row.as_slice());
            row.push(value);
        }
    }

    /// Rebuild the table with columns in the given order (indices into the
    /// current columns). Indices not listed are dropped.
    pub fn reorder(&self, order: &[usize]) -> Table {
        let columns = order.iter().map(|&i| self.columns[i].clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| order.iter().map(|&i| row[i].clone()).collect())
            .collect();

        Table {
            source: self.source.clone(),
            columns,
            rows,
        }
    }

    /// Same data under a different source label
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Borrowed view of one row
    pub fn row(&self, index: usize) -> Option<RowView<'_>> {
        self.rows.get(index).map(|values| RowView {
            columns: &self.columns,
            values,
        })
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = RowView<'_>> {
        self.rows.iter().map(move |values| RowView {
            columns: &self.columns,
            values,
        })
    }

    /// Count Null cells in a column (None if the column is absent)
    pub fn missing_count(&self, column: &str) -> Option<usize> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().filter(|r| r[idx].is_null()).count())
    }
}

/// A row together with its column names
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> RowView<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.values.get(idx)
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }
}

// ============================================================================
// VALUE HELPERS
// ============================================================================

/// Coarse type of a present cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Missing,
    Boolean,
    Number,
    Text,
    Other,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Missing,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::Text,
            _ => ValueKind::Other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Missing => "missing",
            ValueKind::Boolean => "boolean",
            ValueKind::Number => "number",
            ValueKind::Text => "text",
            ValueKind::Other => "structured",
        }
    }
}

/// Equality used for matching: numbers compare numerically (40 == 40.0),
/// Null never equals anything.
pub fn values_match(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        _ => a == b,
    }
}

/// Build a number cell, keeping integral values as integers
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Render a cell for text output (CSV export, log lines)
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => if *b { "True".to_string() } else { "False".to_string() },
        other => other.to_string(),
    }
}

// ============================================================================
// TYPE INFERENCE (for text-based formats)
// ============================================================================

/// Turn raw text cells into typed cells, one whole column at a time.
///
/// A column becomes integers if every present cell parses as an integer,
/// floats if every present cell parses as a number, booleans if every present
/// cell is True/False, text otherwise. Empty cells become Null.
pub fn infer_columns(width: usize, raw_rows: Vec<Vec<Option<String>>>) -> Vec<Vec<Value>> {
    let mut kinds = Vec::with_capacity(width);

    for col in 0..width {
        let cells = raw_rows
            .iter()
            .filter_map(|r| r.get(col).and_then(|c| c.as_deref()))
            .map(str::trim)
            .filter(|c| !c.is_empty());

        kinds.push(infer_kind(cells));
    }

    raw_rows
        .into_iter()
        .map(|row| {
            (0..width)
                .map(|col| {
                    let cell = row.get(col).and_then(|c| c.as_deref()).map(str::trim);
                    match cell {
                        None | Some("") => Value::Null,
                        Some(text) => convert_cell(text, kinds[col]),
                    }
                })
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum InferredKind {
    Integer,
    Float,
    Boolean,
    Text,
}

fn infer_kind<'a>(cells: impl Iterator<Item = &'a str>) -> InferredKind {
    let mut all_int = true;
    let mut all_float = true;
    let mut all_bool = true;

    for cell in cells {
        all_int &= cell.parse::<i64>().is_ok();
        all_float &= cell.parse::<f64>().map(|f| f.is_finite()).unwrap_or(false);
        all_bool &= parse_bool(cell).is_some();
    }

    if all_int {
        InferredKind::Integer
    } else if all_float {
        InferredKind::Float
    } else if all_bool {
        InferredKind::Boolean
    } else {
        InferredKind::Text
    }
}

fn convert_cell(text: &str, kind: InferredKind) -> Value {
    match kind {
        InferredKind::Integer => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        InferredKind::Float => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(text.to_string())),
        InferredKind::Boolean => parse_bool(text)
            .map(Value::Bool)
            .unwrap_or_else(|| Value::String(text.to_string())),
        InferredKind::Text => Value::String(text.to_string()),
    }
}

pub fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "True" | "true" | "TRUE" => Some(true),
        "False" | "false" | "FALSE" => Some(false),
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Table {
        Table::from_rows(
            "csv",
            vec!["first_name".to_string(), "age".to_string()],
            vec![vec![json!("Jane"), json!(40)], vec![json!("John"), Value::Null]],
        )
    }

    #[test]
    fn test_get_by_column_name() {
        let table = sample();
        assert_eq!(table.get(0, "first_name"), Some(&json!("Jane")));
        assert_eq!(table.get(1, "age"), Some(&Value::Null));
        assert_eq!(table.get(0, "missing"), None);
        assert_eq!(table.missing_count("age"), Some(1));
    }

    #[test]
    fn test_push_row_pads_short_rows() {
        let mut table = Table::new("csv", vec!["a".to_string(), "b".to_string()]);
        table.push_row(vec![json!(1)]);
        assert_eq!(table.rows()[0], vec![json!(1), Value::Null]);
    }

    #[test]
    fn test_reorder_moves_columns() {
        let table = sample().reorder(&[1, 0]);
        assert_eq!(table.columns(), &["age".to_string(), "first_name".to_string()]);
        assert_eq!(table.rows()[0], vec![json!(40), json!("Jane")]);
    }

    #[test]
    fn test_values_match_numeric_and_null() {
        assert!(values_match(&json!(40), &json!(40.0)));
        assert!(values_match(&json!("F"), &json!("F")));
        assert!(!values_match(&json!("40"), &json!(40)));
        assert!(!values_match(&Value::Null, &Value::Null));
    }

    #[test]
    fn test_infer_columns_per_column_types() {
        let raw = vec![
            vec![Some("12".to_string()), Some("1.5".to_string()), Some("True".to_string()), Some("M1 2AB".to_string())],
            vec![Some("7".to_string()), Some("3".to_string()), Some("False".to_string()), Some("500".to_string())],
            vec![None, Some("".to_string()), None, None],
        ];

        let rows = infer_columns(4, raw);

        assert_eq!(rows[0][0], json!(12));
        assert_eq!(rows[1][1], json!(3.0));
        assert_eq!(rows[0][2], json!(true));
        // mixed column stays text, even for digit-only cells
        assert_eq!(rows[1][3], json!("500"));
        assert!(rows[2].iter().all(Value::is_null));
    }

    #[test]
    fn test_number_value_keeps_integers() {
        assert_eq!(number_value(2000.0), json!(2000));
        assert_eq!(number_value(2.5), json!(2.5));
    }
}
