// 🔗 Identity Merger - align rows from different sources into one identity
// Sequential inner equi-joins on declared key fields

use crate::error::{PipelineError, PipelineResult};
use crate::table::{render_value, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

// ============================================================================
// DUPLICATE KEY POLICY
// ============================================================================

/// What to do when one side of a join holds the same key more than once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKeyPolicy {
    /// Fail the merge
    Reject,

    /// Keep the first row per key on each side
    KeepFirst,

    /// Emit every combination (cartesian fan-out)
    Expand,
}

impl Default for DuplicateKeyPolicy {
    fn default() -> Self {
        DuplicateKeyPolicy::KeepFirst
    }
}

// ============================================================================
// KEY TOKENS
// ============================================================================

/// Hashable form of a key cell. Numbers collapse so 40 and 40.0 are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyToken {
    Text(String),
    Bool(bool),
    Int(i64),
    Float(u64),
}

impl KeyToken {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(KeyToken::Text(s.clone())),
            Value::Bool(b) => Some(KeyToken::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Some(KeyToken::Int(i));
                }
                let f = n.as_f64()?;
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Some(KeyToken::Int(f as i64))
                } else {
                    Some(KeyToken::Float(f.to_bits()))
                }
            }
            _ => None,
        }
    }
}

type Key = Vec<KeyToken>;

fn row_key(row: &[Value], indices: &[usize]) -> Option<Key> {
    indices
        .iter()
        .map(|&i| KeyToken::from_value(&row[i]))
        .collect()
}

fn display_key(row: &[Value], indices: &[usize]) -> String {
    indices
        .iter()
        .map(|&i| render_value(&row[i]))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// `name` if unused, else `<name>_<source>`, else `<name>_<source>_2`, ...
fn free_column_name(taken: &[String], name: &str, source: &str) -> String {
    if !taken.iter().any(|c| c == name) {
        return name.to_string();
    }

    let base = format!("{}_{}", name, source);
    let mut candidate = base.clone();
    let mut n = 2;
    while taken.iter().any(|c| *c == candidate) {
        candidate = format!("{}_{}", base, n);
        n += 1;
    }
    candidate
}

// ============================================================================
// JOIN REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JoinSide {
    Left,
    Right,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateKey {
    pub side: JoinSide,
    pub key: String,
    pub count: usize,
}

/// What one join kept, dropped and found suspicious
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinReport {
    pub left_source: String,
    pub right_source: String,
    pub keys: Vec<String>,
    pub left_rows: usize,
    pub right_rows: usize,
    pub output_rows: usize,
    /// Left keys with no partner on the right (dropped)
    pub unmatched_left: Vec<String>,
    /// Right keys with no partner on the left (dropped)
    pub unmatched_right: Vec<String>,
    pub duplicate_keys: Vec<DuplicateKey>,
}

impl JoinReport {
    pub fn has_findings(&self) -> bool {
        self.output_rows == 0
            || !self.unmatched_left.is_empty()
            || !self.unmatched_right.is_empty()
            || !self.duplicate_keys.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} ⋈ {} on ({}): {} × {} → {} rows, {} unmatched left, {} unmatched right, {} duplicate keys",
            self.left_source,
            self.right_source,
            self.keys.join(", "),
            self.left_rows,
            self.right_rows,
            self.output_rows,
            self.unmatched_left.len(),
            self.unmatched_right.len(),
            self.duplicate_keys.len()
        )
    }
}

// ============================================================================
// MERGE PLAN
// ============================================================================

/// One join: merge the running result with `with` on `on`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinStep {
    pub with: String,
    pub on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergePlan {
    /// Source the first join starts from
    pub base: String,
    pub steps: Vec<JoinStep>,
    #[serde(default)]
    pub duplicate_policy: DuplicateKeyPolicy,
}

impl Default for MergePlan {
    /// csv ⋈ xml on name/age/sex, then ⋈ json on name/age/postcode
    fn default() -> Self {
        let key = |extra: &str| {
            ["first_name", "last_name", "age", extra]
                .iter()
                .map(|s| s.to_string())
                .collect()
        };

        MergePlan {
            base: "csv".to_string(),
            steps: vec![
                JoinStep {
                    with: "xml".to_string(),
                    on: key("sex"),
                },
                JoinStep {
                    with: "json".to_string(),
                    on: key("address_postcode"),
                },
            ],
            duplicate_policy: DuplicateKeyPolicy::default(),
        }
    }
}

// ============================================================================
// IDENTITY MERGER
// ============================================================================

pub struct IdentityMerger {
    pub policy: DuplicateKeyPolicy,
}

impl IdentityMerger {
    pub fn new(policy: DuplicateKeyPolicy) -> Self {
        IdentityMerger { policy }
    }

    /// Run every step of the plan, starting from the base source
    pub fn merge_plan(
        &self,
        plan: &MergePlan,
        tables: &HashMap<String, Table>,
    ) -> PipelineResult<(Table, Vec<JoinReport>)> {
        let lookup = |name: &str| {
            tables
                .get(name)
                .ok_or_else(|| PipelineError::Merge(format!("merge plan names unknown source '{}'", name)))
        };

        let mut result = lookup(&plan.base)?.clone();
        let mut reports = Vec::with_capacity(plan.steps.len());

        for step in &plan.steps {
            let right = lookup(&step.with)?;
            let (joined, report) = self.join(&result, right, &step.on)?;
            result = joined;
            reports.push(report);
        }

        Ok((result, reports))
    }

    /// Inner join of `left` and `right` on `keys`.
    ///
    /// Output follows left row order. Key columns appear once, in their left
    /// position; right non-key columns are appended, renamed
    /// `<name>_<right source>` (plus a counter if that is taken too) when the
    /// name is already in use.
    pub fn join(
        &self,
        left: &Table,
        right: &Table,
        keys: &[String],
    ) -> PipelineResult<(Table, JoinReport)> {
        if keys.is_empty() {
            return Err(PipelineError::Merge("join needs at least one key field".to_string()));
        }

        let key_indices = |table: &Table| -> PipelineResult<Vec<usize>> {
            keys.iter()
                .map(|k| {
                    table.column_index(k).ok_or_else(|| {
                        PipelineError::Merge(format!(
                            "key field '{}' missing from '{}'",
                            k,
                            table.source()
                        ))
                    })
                })
                .collect()
        };
        let left_keys = key_indices(left)?;
        let right_keys = key_indices(right)?;

        // Right index: key → row indices, in right order
        let mut right_index: HashMap<Key, Vec<usize>> = HashMap::new();
        let mut right_order: Vec<Key> = Vec::new();
        let mut right_unkeyed = Vec::new();
        for (i, row) in right.rows().iter().enumerate() {
            match row_key(row, &right_keys) {
                Some(key) => {
                    let entry = right_index.entry(key.clone()).or_default();
                    if entry.is_empty() {
                        right_order.push(key);
                    }
                    entry.push(i);
                }
                None => right_unkeyed.push(i),
            }
        }

        // Left duplicates, first occurrence order
        let mut left_counts: HashMap<Key, (usize, usize)> = HashMap::new();
        for (i, row) in left.rows().iter().enumerate() {
            if let Some(key) = row_key(row, &left_keys) {
                left_counts.entry(key).or_insert((i, 0)).1 += 1;
            }
        }

        let mut duplicate_keys = Vec::new();
        let mut left_dupes: Vec<(usize, usize)> = left_counts
            .values()
            .filter(|(_, count)| *count > 1)
            .copied()
            .collect();
        left_dupes.sort();
        for (first, count) in left_dupes {
            duplicate_keys.push(DuplicateKey {
                side: JoinSide::Left,
                key: display_key(&left.rows()[first], &left_keys),
                count,
            });
        }
        for key in &right_order {
            let rows = &right_index[key];
            if rows.len() > 1 {
                duplicate_keys.push(DuplicateKey {
                    side: JoinSide::Right,
                    key: display_key(&right.rows()[rows[0]], &right_keys),
                    count: rows.len(),
                });
            }
        }

        if self.policy == DuplicateKeyPolicy::Reject && !duplicate_keys.is_empty() {
            let listed: Vec<String> = duplicate_keys
                .iter()
                .map(|d| format!("{} ×{} ({:?})", d.key, d.count, d.side))
                .collect();
            return Err(PipelineError::Merge(format!(
                "duplicate identity keys joining '{}' with '{}': {}",
                left.source(),
                right.source(),
                listed.join("; ")
            )));
        }

        // Output schema
        let right_key_set: HashSet<usize> = right_keys.iter().copied().collect();
        let right_carry: Vec<usize> = (0..right.columns().len())
            .filter(|i| !right_key_set.contains(i))
            .collect();

        let mut columns: Vec<String> = left.columns().to_vec();
        for &i in &right_carry {
            let name = free_column_name(&columns, &right.columns()[i], right.source());
            columns.push(name);
        }

        let mut output = Table::new(format!("{}+{}", left.source(), right.source()), columns);
        let mut unmatched_left = Vec::new();
        let mut matched_right: HashSet<Key> = HashSet::new();
        let mut seen_left: HashSet<Key> = HashSet::new();

        for row in left.rows() {
            let key = match row_key(row, &left_keys) {
                Some(key) => key,
                None => {
                    unmatched_left.push(display_key(row, &left_keys));
                    continue;
                }
            };

            let first_time = seen_left.insert(key.clone());
            if self.policy == DuplicateKeyPolicy::KeepFirst && !first_time {
                continue;
            }

            let partners = match right_index.get(&key) {
                Some(rows) => rows,
                None => {
                    unmatched_left.push(display_key(row, &left_keys));
                    continue;
                }
            };
            matched_right.insert(key);

            let partners: &[usize] = match self.policy {
                DuplicateKeyPolicy::Expand => partners,
                _ => &partners[..1],
            };

            for &p in partners {
                let right_row = &right.rows()[p];
                let mut joined = row.clone();
                joined.extend(right_carry.iter().map(|&i| right_row[i].clone()));
                output.push_row(joined);
            }
        }

        let mut unmatched_right: Vec<String> = right_order
            .iter()
            .filter(|k| !matched_right.contains(*k))
            .map(|k| display_key(&right.rows()[right_index[k][0]], &right_keys))
            .collect();
        unmatched_right.extend(
            right_unkeyed
                .iter()
                .map(|&i| display_key(&right.rows()[i], &right_keys)),
        );

        let report = JoinReport {
            left_source: left.source().to_string(),
            right_source: right.source().to_string(),
            keys: keys.to_vec(),
            left_rows: left.len(),
            right_rows: right.len(),
            output_rows: output.len(),
            unmatched_left,
            unmatched_right,
            duplicate_keys,
        };

        Ok((output, report))
    }
}

impl Default for IdentityMerger {
    fn default() -> Self {
        Self::new(DuplicateKeyPolicy::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn keys(names: &[&str]) -> Vec<String> {
        cols(names)
    }

    fn csv() -> Table {
        Table::from_rows(
            "csv",
            cols(&["first_name", "last_name", "age", "sex", "vehicle_make"]),
            vec![
                vec![json!("Jane"), json!("Doe"), json!(40), json!("F"), json!("Ford")],
                vec![json!("John"), json!("Roe"), json!(51), json!("M"), json!("Kia")],
            ],
        )
    }

    fn xml() -> Table {
        Table::from_rows(
            "xml",
            cols(&["first_name", "last_name", "age", "sex", "salary", "address_postcode"]),
            vec![
                vec![json!("John"), json!("Roe"), json!(52), json!("M"), json!(30000), json!("B1 1AA")],
                vec![json!("Jane"), json!("Doe"), json!(40.0), json!("F"), json!(45000), json!("M1 2AB")],
            ],
        )
    }

    fn json_source() -> Table {
        Table::from_rows(
            "json",
            cols(&["first_name", "last_name", "age", "address_postcode", "iban"]),
            vec![vec![json!("Jane"), json!("Doe"), json!(40), json!("M1 2AB"), json!("GB01")]],
        )
    }

    #[test]
    fn test_single_identity_across_sources() {
        let merger = IdentityMerger::default();
        let (joined, report) = merger
            .join(&csv(), &xml(), &keys(&["first_name", "last_name", "age", "sex"]))
            .unwrap();

        assert_eq!(joined.len(), 1);
        assert_eq!(joined.get(0, "first_name"), Some(&json!("Jane")));
        assert_eq!(joined.get(0, "salary"), Some(&json!(45000)));
        assert_eq!(
            joined.columns(),
            &["first_name", "last_name", "age", "sex", "vehicle_make", "salary", "address_postcode"]
        );
        assert_eq!(report.output_rows, 1);
    }

    #[test]
    fn test_disagreeing_key_drops_identity_and_reports_it() {
        // John's age differs between csv (51) and xml (52)
        let (joined, report) = IdentityMerger::default()
            .join(&csv(), &xml(), &keys(&["first_name", "last_name", "age", "sex"]))
            .unwrap();

        assert!(joined.iter_rows().all(|r| r.get("first_name") != Some(&json!("John"))));
        assert_eq!(report.unmatched_left, vec!["John | Roe | 51 | M".to_string()]);
        assert_eq!(report.unmatched_right, vec!["John | Roe | 52 | M".to_string()]);
        assert!(report.has_findings());
    }

    #[test]
    fn test_default_plan_runs_two_joins() {
        let mut tables = HashMap::new();
        tables.insert("csv".to_string(), csv());
        tables.insert("xml".to_string(), xml());
        tables.insert("json".to_string(), json_source());

        let (unified, reports) = IdentityMerger::default()
            .merge_plan(&MergePlan::default(), &tables)
            .unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(unified.len(), 1);
        assert_eq!(unified.get(0, "iban"), Some(&json!("GB01")));
        assert_eq!(unified.source(), "csv+xml+json");
    }

    #[test]
    fn test_unknown_source_in_plan_fails() {
        let tables = HashMap::new();
        let err = IdentityMerger::default()
            .merge_plan(&MergePlan::default(), &tables)
            .unwrap_err();
        assert_eq!(err.stage(), "merge");
    }

    #[test]
    fn test_missing_key_column_fails() {
        let err = IdentityMerger::default()
            .join(&csv(), &json_source(), &keys(&["first_name", "sex"]))
            .unwrap_err();
        assert_eq!(err.stage(), "merge");
    }

    fn duplicated_right() -> Table {
        Table::from_rows(
            "xml",
            cols(&["first_name", "salary"]),
            vec![
                vec![json!("Jane"), json!(1)],
                vec![json!("Jane"), json!(2)],
            ],
        )
    }

    fn names() -> Table {
        Table::from_rows("csv", cols(&["first_name"]), vec![vec![json!("Jane")]])
    }

    #[test]
    fn test_duplicate_keys_keep_first() {
        let (joined, report) = IdentityMerger::new(DuplicateKeyPolicy::KeepFirst)
            .join(&names(), &duplicated_right(), &keys(&["first_name"]))
            .unwrap();

        assert_eq!(joined.len(), 1);
        assert_eq!(joined.get(0, "salary"), Some(&json!(1)));
        assert_eq!(report.duplicate_keys.len(), 1);
        assert_eq!(report.duplicate_keys[0].count, 2);
        assert_eq!(report.duplicate_keys[0].side, JoinSide::Right);
    }

    #[test]
    fn test_duplicate_keys_expand() {
        let (joined, _) = IdentityMerger::new(DuplicateKeyPolicy::Expand)
            .join(&names(), &duplicated_right(), &keys(&["first_name"]))
            .unwrap();

        assert_eq!(joined.len(), 2);
    }

    #[test]
    fn test_duplicate_keys_reject() {
        let result = IdentityMerger::new(DuplicateKeyPolicy::Reject)
            .join(&names(), &duplicated_right(), &keys(&["first_name"]));

        assert!(result.is_err());
    }

    #[test]
    fn test_left_duplicates_keep_first() {
        let left = Table::from_rows(
            "csv",
            cols(&["first_name", "tag"]),
            vec![vec![json!("Jane"), json!("a")], vec![json!("Jane"), json!("b")]],
        );
        let right = Table::from_rows("xml", cols(&["first_name"]), vec![vec![json!("Jane")]]);

        let (joined, report) = IdentityMerger::default()
            .join(&left, &right, &keys(&["first_name"]))
            .unwrap();

        assert_eq!(joined.len(), 1);
        assert_eq!(joined.get(0, "tag"), Some(&json!("a")));
        assert_eq!(report.duplicate_keys[0].side, JoinSide::Left);
    }

    #[test]
    fn test_null_keys_never_match() {
        let left = Table::from_rows("csv", cols(&["first_name"]), vec![vec![Value::Null]]);
        let right = Table::from_rows("xml", cols(&["first_name"]), vec![vec![Value::Null]]);

        let (joined, report) = IdentityMerger::default()
            .join(&left, &right, &keys(&["first_name"]))
            .unwrap();

        assert!(joined.is_empty());
        assert_eq!(report.unmatched_left.len(), 1);
        assert_eq!(report.unmatched_right.len(), 1);
    }

    #[test]
    fn test_overlapping_non_key_column_is_suffixed() {
        let left = Table::from_rows(
            "csv",
            cols(&["first_name", "company"]),
            vec![vec![json!("Jane"), json!("Acme")]],
        );
        let right = Table::from_rows(
            "xml",
            cols(&["first_name", "company"]),
            vec![vec![json!("Jane"), json!("Initech")]],
        );

        let (joined, _) = IdentityMerger::default()
            .join(&left, &right, &keys(&["first_name"]))
            .unwrap();

        assert_eq!(joined.columns(), &["first_name", "company", "company_xml"]);
        assert_eq!(joined.get(0, "company_xml"), Some(&json!("Initech")));
    }

    #[test]
    fn test_suffixed_column_name_already_taken_gets_counter() {
        let left = Table::from_rows(
            "csv+json",
            cols(&["first_name", "company", "company_xml"]),
            vec![vec![json!("Jane"), json!("L1"), json!("L2")]],
        );
        let right = Table::from_rows(
            "xml",
            cols(&["first_name", "company"]),
            vec![vec![json!("Jane"), json!("R1")]],
        );

        let (joined, _) = IdentityMerger::default()
            .join(&left, &right, &keys(&["first_name"]))
            .unwrap();

        assert_eq!(
            joined.columns(),
            &["first_name", "company", "company_xml", "company_xml_2"]
        );
        assert_eq!(joined.get(0, "company_xml"), Some(&json!("L2")));
        assert_eq!(joined.get(0, "company_xml_2"), Some(&json!("R1")));
    }
}
