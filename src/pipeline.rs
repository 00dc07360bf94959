// 🚚 Batch Pipeline - read → normalize → fill → correct → merge → derive → persist
// Every stage takes a table and returns a new one; nothing shared is mutated

use crate::config::{BatchConfig, SourceConfig};
use crate::corrections::{CorrectionEngine, CorrectionLedger, CorrectionOutcome};
use crate::customer::Customer;
use crate::db::{self, BatchLoad, BatchStamp};
use crate::derive::derive_full_name;
use crate::error::{PipelineError, PipelineResult};
use crate::export::write_csv;
use crate::gap_fill::{fill_gaps, FillOutcome};
use crate::merge::{IdentityMerger, JoinReport};
use crate::normalize::normalize;
use crate::sources::{fingerprint_file, get_reader, SourceFingerprint, SourceFormat};
use crate::table::{render_value, Table};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

// ============================================================================
// REPORT
// ============================================================================

/// Everything the operator should see about a batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub fingerprints: Vec<SourceFingerprint>,
    pub notes: Vec<String>,
    pub fills: Vec<FillOutcome>,
    pub corrections: Vec<CorrectionOutcome>,
    pub joins: Vec<JoinReport>,
    pub warnings: Vec<String>,
}

impl BatchReport {
    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Tables read from disk, keyed by source name
#[derive(Debug, Clone, Default)]
pub struct LoadedSources {
    pub tables: HashMap<String, Table>,
    pub notes: Vec<String>,
    pub fingerprints: Vec<SourceFingerprint>,
}

/// Result of a full run
#[derive(Debug)]
pub struct BatchOutcome {
    pub stamp: BatchStamp,
    pub unified: Table,
    pub customers: Vec<Customer>,
    pub inserted: usize,
    pub report: BatchReport,
}

// ============================================================================
// STAGES
// ============================================================================

/// Read every configured source. Any failure aborts the batch.
pub fn load_sources(config: &BatchConfig) -> PipelineResult<LoadedSources> {
    let mut loaded = LoadedSources::default();

    for source in &config.sources {
        let format = source.resolved_format()?;
        let path = config.resolve(&source.path);
        let reader = get_reader(format);

        let table = reader
            .read(&path, &source.name)
            .map_err(|e| PipelineError::read(&source.name, e))?;
        let sha256 = fingerprint_file(&path).map_err(|e| PipelineError::read(&source.name, e))?;

        info!(
            source = %source.name,
            format = format.name(),
            reader = reader.version(),
            rows = table.len(),
            columns = table.columns().len(),
            "source loaded"
        );

        loaded.fingerprints.push(SourceFingerprint {
            source: source.name.clone(),
            path: path.display().to_string(),
            sha256,
            rows: table.len(),
        });

        if format == SourceFormat::Text {
            loaded
                .notes
                .extend(table.rows().iter().map(|r| render_value(&r[0])));
        } else {
            loaded.tables.insert(source.name.clone(), table);
        }
    }

    Ok(loaded)
}

/// Normalize names, then fill gaps, for one source
pub fn prepare_source(
    table: &Table,
    source: &SourceConfig,
) -> PipelineResult<(Table, Vec<FillOutcome>)> {
    let normalized = normalize(table, &source.rename)?;
    fill_gaps(&normalized, &source.fill)
}

/// Apply the correction rules to every table, once per batch
pub fn apply_corrections(
    tables: &HashMap<String, Table>,
    engine: &CorrectionEngine,
    ledger: &mut CorrectionLedger,
) -> PipelineResult<(HashMap<String, Table>, Vec<CorrectionOutcome>)> {
    let mut corrected = HashMap::with_capacity(tables.len());
    let mut outcomes = Vec::new();

    // Stable order so outcomes read the same on every run
    let mut names: Vec<&String> = tables.keys().collect();
    names.sort();

    for name in names {
        let (table, mut rule_outcomes) = engine.apply(&tables[name], ledger)?;
        outcomes.append(&mut rule_outcomes);
        corrected.insert(name.clone(), table);
    }

    Ok((corrected, outcomes))
}

/// Map every unified row onto the customer entity
pub fn to_customers(unified: &Table) -> PipelineResult<Vec<Customer>> {
    unified
        .iter_rows()
        .enumerate()
        .map(|(i, row)| {
            Customer::from_row(&row).map_err(|error| PipelineError::Map { row: i + 1, error })
        })
        .collect()
}

/// Everything between reading and persisting: prepare, correct, merge, derive.
///
/// One call is one batch: corrections are tracked in a fresh ledger, so each
/// rule lands exactly once on the tables read from disk.
pub fn unify(config: &BatchConfig, loaded: &LoadedSources) -> PipelineResult<(Table, BatchReport)> {
    let mut report = BatchReport {
        fingerprints: loaded.fingerprints.clone(),
        notes: loaded.notes.clone(),
        ..BatchReport::default()
    };

    let mut prepared = HashMap::with_capacity(loaded.tables.len());
    for source in config.sources.iter().filter(|s| loaded.tables.contains_key(&s.name)) {
        let (table, fills) = prepare_source(&loaded.tables[&source.name], source)?;
        for fill in &fills {
            if !fill.column_present {
                report.warn(format!(
                    "fill rule for '{}' on '{}' names a column the source does not have",
                    fill.field, fill.source
                ));
            }
        }
        report.fills.extend(fills);
        prepared.insert(source.name.clone(), table);
    }

    let engine = CorrectionEngine::from_rules(config.corrections.clone());
    let mut ledger = CorrectionLedger::new();
    let (corrected, outcomes) = apply_corrections(&prepared, &engine, &mut ledger)?;
    for outcome in outcomes.iter().filter(|o| !o.skipped && o.matched_rows == 0) {
        report.warn(format!(
            "correction '{}' matched no rows in '{}'",
            outcome.rule_id, outcome.source
        ));
    }
    report.corrections = outcomes;

    let merger = IdentityMerger::new(config.merge.duplicate_policy);
    let (merged, joins) = merger.merge_plan(&config.merge, &corrected)?;
    for join in &joins {
        info!("{}", join.summary());
        if join.output_rows == 0 {
            report.warn(format!(
                "joining '{}' with '{}' produced no rows",
                join.left_source, join.right_source
            ));
        }
        for key in &join.unmatched_left {
            report.warn(format!(
                "identity ({}) from '{}' has no match in '{}'; dropped",
                key, join.left_source, join.right_source
            ));
        }
        for key in &join.unmatched_right {
            report.warn(format!(
                "identity ({}) from '{}' has no match in '{}'; dropped",
                key, join.right_source, join.left_source
            ));
        }
        for dup in &join.duplicate_keys {
            report.warn(format!(
                "identity ({}) appears {} times on the {:?} side of '{}' ⋈ '{}' ({:?} policy)",
                dup.key, dup.count, dup.side, join.left_source, join.right_source,
                config.merge.duplicate_policy
            ));
        }
    }
    report.joins = joins;

    let unified = derive_full_name(&merged)?;
    info!(rows = unified.len(), columns = unified.columns().len(), "unified table built");

    Ok((unified, report))
}

/// Run the whole batch once: read, unify, persist, audit, export
pub fn run_batch(config: &BatchConfig) -> PipelineResult<BatchOutcome> {
    let loaded = load_sources(config)?;
    for note in loaded.notes.iter().filter(|n| !n.trim().is_empty()) {
        info!(note = %note, "operator note");
    }

    let (unified, report) = unify(config, &loaded)?;
    let customers = to_customers(&unified)?;

    let stamp = BatchStamp::new();
    let db_path = config.database_path();
    let inserted = db::with_connection(&db_path, |conn| {
        db::setup_database(conn)?;
        let inserted = db::insert_customers(conn, &customers, &stamp)?;

        let load = BatchLoad::new(
            &stamp,
            inserted,
            report.warnings.len(),
            report.fingerprints.clone(),
        );
        db::record_batch_load(conn, &load)?;

        Ok(inserted)
    })?;

    // Only committed batches are exported
    if let Some(path) = config.export_path() {
        write_csv(&unified, &path)?;
        info!(path = %path.display(), "unified table exported");
    }

    Ok(BatchOutcome {
        stamp,
        unified,
        customers,
        inserted,
        report,
    })
}

// ============================================================================
// TESTS
// ============================================================================
