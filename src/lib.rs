// Customer Unify - Core Library
// Reads customer records from CSV/JSON/XML/text, reconciles them into one
// record per customer and loads the result into SQLite

pub mod table;
pub mod error;
pub mod sources;        // Source readers (CSV, JSON, XML, text)
pub mod normalize;      // Rename tables → canonical field names
pub mod gap_fill;       // Missing values → declared defaults
pub mod corrections;    // Manual corrections, applied once per batch
pub mod merge;          // Identity merger (sequential inner joins)
pub mod derive;         // full_name
pub mod customer;       // Typed persistence entity
pub mod config;
pub mod db;
pub mod export;
pub mod pipeline;

// Re-export commonly used types
pub use table::{Table, RowView, ValueKind};
pub use error::{PipelineError, PipelineResult};
pub use sources::{
    SourceReader, SourceFormat, SourceFingerprint,
    detect_format, get_reader, fingerprint_file,
    CsvSourceReader, JsonSourceReader, XmlSourceReader, TextSourceReader,
};
pub use normalize::{normalize, RenameTable};
pub use gap_fill::{fill_gaps, FillRule, FillOutcome};
pub use corrections::{
    CorrectionRule, CorrectionAction, CorrectionEngine, CorrectionLedger, CorrectionOutcome,
};
pub use merge::{
    IdentityMerger, DuplicateKeyPolicy, MergePlan, JoinStep, JoinReport, JoinSide, DuplicateKey,
};
pub use derive::{derive_full_name, FULL_NAME};
pub use customer::{Customer, FieldError};
pub use config::{BatchConfig, SourceConfig, DatabaseConfig, OutputConfig, DB_PATH_ENV};
pub use db::{
    BatchStamp, BatchLoad,
    with_connection, setup_database, insert_customers,
    record_batch_load, get_batch_load, list_batch_loads,
    get_all_customers, verify_count,
};
pub use export::write_csv;
pub use pipeline::{
    BatchOutcome, BatchReport, LoadedSources,
    load_sources, prepare_source, apply_corrections, unify, to_customers, run_batch,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
