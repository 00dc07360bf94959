// 🩹 Gap Filler - missing values → declared, type-appropriate defaults

use crate::error::{PipelineError, PipelineResult};
use crate::table::{Table, ValueKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Replace missing values of `field` with `default`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillRule {
    pub field: String,

    /// Number for counts/amounts, text sentinel for categorical fields
    pub default: Value,
}

impl FillRule {
    pub fn new(field: impl Into<String>, default: Value) -> Self {
        FillRule {
            field: field.into(),
            default,
        }
    }
}

/// What one rule did to one table
#[derive(Debug, Clone, Serialize)]
pub struct FillOutcome {
    pub source: String,
    pub field: String,
    pub filled: usize,
    pub column_present: bool,
}

/// Apply every rule, returning the filled table and one outcome per rule.
///
/// A default whose type disagrees with the column's present values is
/// rejected. Rules for absent columns are no-ops.
pub fn fill_gaps(table: &Table, rules: &[FillRule]) -> PipelineResult<(Table, Vec<FillOutcome>)> {
    let mut filled = table.clone();
    let mut outcomes = Vec::with_capacity(rules.len());

    for rule in rules {
        let fail = |message: String| PipelineError::Fill {
            source_name: table.source().to_string(),
            field: rule.field.clone(),
            message,
        };

        let default_kind = ValueKind::of(&rule.default);
        if !matches!(default_kind, ValueKind::Number | ValueKind::Text) {
            return Err(fail(format!(
                "default must be a number or text, got {}",
                default_kind.name()
            )));
        }

        let idx = match filled.column_index(&rule.field) {
            Some(idx) => idx,
            None => {
                outcomes.push(FillOutcome {
                    source: table.source().to_string(),
                    field: rule.field.clone(),
                    filled: 0,
                    column_present: false,
                });
                continue;
            }
        };

        if let Some(other) = filled
            .rows()
            .iter()
            .map(|r| ValueKind::of(&r[idx]))
            .find(|k| *k != ValueKind::Missing && *k != default_kind)
        {
            return Err(fail(format!(
                "{} default does not fit a {} column",
                default_kind.name(),
                other.name()
            )));
        }

        let missing: Vec<usize> = filled
            .rows()
            .iter()
            .enumerate()
            .filter(|(_, r)| r[idx].is_null())
            .map(|(i, _)| i)
            .collect();

        for &row in &missing {
            filled.set(row, idx, rule.default.clone());
        }

        outcomes.push(FillOutcome {
            source: table.source().to_string(),
            field: rule.field.clone(),
            filled: missing.len(),
            column_present: true,
        });
    }

    Ok((filled, outcomes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn xml_table() -> Table {
        Table::from_rows(
            "xml",
            vec![
                "first_name".to_string(),
                "dependants".to_string(),
                "company".to_string(),
            ],
            vec![
                vec![json!("Jane"), json!(2), json!("Acme")],
                vec![json!("John"), Value::Null, Value::Null],
            ],
        )
    }

    fn xml_rules() -> Vec<FillRule> {
        vec![
            FillRule::new("dependants", json!(0)),
            FillRule::new("company", json!("Unknown")),
        ]
    }

    #[test]
    fn test_fills_numeric_and_sentinel_defaults() {
        let (filled, outcomes) = fill_gaps(&xml_table(), &xml_rules()).unwrap();

        assert_eq!(filled.get(1, "dependants"), Some(&json!(0)));
        assert_eq!(filled.get(1, "company"), Some(&json!("Unknown")));
        assert_eq!(filled.get(0, "company"), Some(&json!("Acme")));
        assert_eq!(outcomes[0].filled, 1);
        assert_eq!(outcomes[1].filled, 1);
    }

    #[test]
    fn test_fill_is_idempotent() {
        let (once, _) = fill_gaps(&xml_table(), &xml_rules()).unwrap();
        let (twice, outcomes) = fill_gaps(&once, &xml_rules()).unwrap();

        assert_eq!(once, twice);
        assert!(outcomes.iter().all(|o| o.filled == 0));
    }

    #[test]
    fn test_no_missing_values_is_noop() {
        let table = Table::from_rows(
            "json",
            vec!["debt".to_string()],
            vec![vec![json!(10.5)], vec![json!(0)]],
        );
        let (filled, outcomes) = fill_gaps(&table, &[FillRule::new("debt", json!(0))]).unwrap();

        assert_eq!(filled, table);
        assert_eq!(outcomes[0].filled, 0);
    }

    #[test]
    fn test_text_default_rejected_for_numeric_column() {
        let err = fill_gaps(&xml_table(), &[FillRule::new("dependants", json!("Unknown"))]).unwrap_err();
        assert_eq!(err.stage(), "fill");
    }

    #[test]
    fn test_numeric_default_rejected_for_text_column() {
        assert!(fill_gaps(&xml_table(), &[FillRule::new("company", json!(0))]).is_err());
    }

    #[test]
    fn test_absent_column_is_reported_not_failed() {
        let (filled, outcomes) = fill_gaps(&xml_table(), &[FillRule::new("debt", json!(0))]).unwrap();

        assert_eq!(filled, xml_table());
        assert!(!outcomes[0].column_present);
    }
}
