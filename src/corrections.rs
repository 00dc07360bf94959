// ✏️ Manual Corrections - Rules as Data
// Record-specific overrides matched by exact field values, applied once per batch

use crate::error::{PipelineError, PipelineResult};
use crate::table::{number_value, values_match, RowView, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CorrectionAction {
    /// Overwrite the field with a literal. Safe to repeat.
    Set { field: String, value: Value },

    /// Add a delta to the current numeric value. Repeating adds it again,
    /// hence the ledger.
    Adjust { field: String, delta: f64 },
}

impl CorrectionAction {
    pub fn field(&self) -> &str {
        match self {
            CorrectionAction::Set { field, .. } => field,
            CorrectionAction::Adjust { field, .. } => field,
        }
    }

    pub fn is_idempotent(&self) -> bool {
        matches!(self, CorrectionAction::Set { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRule {
    /// Rule ID for tracking
    pub id: String,

    /// Where the instruction came from / what it fixes
    #[serde(default)]
    pub description: Option<String>,

    /// Source tables the rule applies to
    pub sources: Vec<String>,

    /// Field → exact value; every entry must match
    #[serde(rename = "match")]
    pub matches: BTreeMap<String, Value>,

    pub action: CorrectionAction,
}

impl CorrectionRule {
    /// Check if every match field of the row equals the rule's value
    pub fn matches(&self, row: &RowView<'_>) -> bool {
        self.matches.iter().all(|(field, expected)| {
            row.get(field)
                .map(|actual| values_match(actual, expected))
                .unwrap_or(false)
        })
    }

    pub fn applies_to(&self, source: &str) -> bool {
        self.sources.iter().any(|s| s == source)
    }
}

// ============================================================================
// LEDGER
// ============================================================================

/// (rule, source) pairs already applied in this batch
#[derive(Debug, Default)]
pub struct CorrectionLedger {
    applied: HashSet<(String, String)>,
}

impl CorrectionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_applied(&self, rule_id: &str, source: &str) -> bool {
        self.applied
            .contains(&(rule_id.to_string(), source.to_string()))
    }

    fn mark_applied(&mut self, rule_id: &str, source: &str) {
        self.applied.insert((rule_id.to_string(), source.to_string()));
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CorrectionOutcome {
    pub rule_id: String,
    pub source: String,
    pub matched_rows: usize,
    /// Already applied earlier in the batch; nothing was changed
    pub skipped: bool,
}

// ============================================================================
// CORRECTION ENGINE
// ============================================================================

pub struct CorrectionEngine {
    rules: Vec<CorrectionRule>,
}

impl CorrectionEngine {
    pub fn new() -> Self {
        CorrectionEngine { rules: Vec::new() }
    }

    /// Create engine from a list of rules (applied in list order)
    pub fn from_rules(rules: Vec<CorrectionRule>) -> Self {
        CorrectionEngine { rules }
    }

    pub fn add_rule(&mut self, rule: CorrectionRule) {
        self.rules.push(rule);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> &[CorrectionRule] {
        &self.rules
    }

    /// Apply every rule targeting this table's source.
    ///
    /// Rules already recorded in the ledger for this source are skipped, so
    /// running the stage twice in one batch changes nothing the second time.
    pub fn apply(
        &self,
        table: &Table,
        ledger: &mut CorrectionLedger,
    ) -> PipelineResult<(Table, Vec<CorrectionOutcome>)> {
        let source = table.source().to_string();
        let mut corrected = table.clone();
        let mut outcomes = Vec::new();

        for rule in self.rules.iter().filter(|r| r.applies_to(&source)) {
            if ledger.is_applied(&rule.id, &source) {
                debug!(rule = %rule.id, source = %source, "correction already applied, skipping");
                outcomes.push(CorrectionOutcome {
                    rule_id: rule.id.clone(),
                    source: source.clone(),
                    matched_rows: 0,
                    skipped: true,
                });
                continue;
            }

            let matched = apply_rule(rule, &mut corrected)?;
            ledger.mark_applied(&rule.id, &source);

            if matched == 0 {
                warn!(rule = %rule.id, source = %source, "correction matched no rows");
            } else {
                debug!(rule = %rule.id, source = %source, rows = matched, "correction applied");
            }

            outcomes.push(CorrectionOutcome {
                rule_id: rule.id.clone(),
                source: source.clone(),
                matched_rows: matched,
                skipped: false,
            });
        }

        Ok((corrected, outcomes))
    }
}

impl Default for CorrectionEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_rule(rule: &CorrectionRule, table: &mut Table) -> PipelineResult<usize> {
    let source_name = table.source().to_string();
    let fail = |message: String| PipelineError::Correct {
        rule_id: rule.id.clone(),
        source_name: source_name.clone(),
        message,
    };

    let field = rule.action.field();
    let idx = table
        .column_index(field)
        .ok_or_else(|| fail(format!("field '{}' not present", field)))?;

    let targets: Vec<usize> = table
        .iter_rows()
        .enumerate()
        .filter(|(_, row)| rule.matches(row))
        .map(|(i, _)| i)
        .collect();

    let mut updates = Vec::with_capacity(targets.len());
    for &row in &targets {
        let new_value = match &rule.action {
            CorrectionAction::Set { value, .. } => value.clone(),
            CorrectionAction::Adjust { delta, .. } => {
                let current = &table.rows()[row][idx];
                let n = current.as_f64().ok_or_else(|| {
                    fail(format!(
                        "cannot adjust non-numeric value {} in '{}'",
                        current, field
                    ))
                })?;
                number_value(n + delta)
            }
        };
        updates.push((row, new_value));
    }

    for (row, value) in updates {
        table.set(row, idx, value);
    }

    Ok(targets.len())
}

// ============================================================================
// TESTS
// ============================================================================
