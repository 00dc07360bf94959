// ❗ Pipeline errors - one variant per stage, so the operator sees where it broke

use crate::customer::FieldError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Config file missing, unparsable or inconsistent
    #[error("{0}")]
    Config(String),

    /// A source file could not be read or parsed
    #[error("source '{source_name}': {message}")]
    Read { source_name: String, message: String },

    /// A rename table would produce an invalid schema
    #[error("source '{source_name}': {message}")]
    Normalize { source_name: String, message: String },

    /// A fill default does not fit the column
    #[error("source '{source_name}', field '{field}': {message}")]
    Fill {
        source_name: String,
        field: String,
        message: String,
    },

    /// A correction rule could not be applied
    #[error("rule '{rule_id}' on '{source_name}': {message}")]
    Correct {
        rule_id: String,
        source_name: String,
        message: String,
    },

    /// Join failed (missing key column, rejected duplicate key, ...)
    #[error("{0}")]
    Merge(String),

    /// full_name could not be derived
    #[error("{0}")]
    Derive(String),

    /// A unified row does not fit the customer entity
    #[error("row {row}: {error}")]
    Map {
        row: usize,
        #[source]
        error: FieldError,
    },

    /// A row violated a UNIQUE constraint; the whole batch was rolled back
    #[error("uniqueness violation for '{full_name}': {message} (batch rolled back)")]
    UniqueViolation { full_name: String, message: String },

    /// Any other database failure
    #[error("{0}")]
    Persist(String),

    /// The unified CSV could not be written
    #[error("{0}")]
    Export(String),
}

impl PipelineError {
    /// Name of the stage that failed
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "config",
            PipelineError::Read { .. } => "read",
            PipelineError::Normalize { .. } => "normalize",
            PipelineError::Fill { .. } => "fill",
            PipelineError::Correct { .. } => "correct",
            PipelineError::Merge(_) => "merge",
            PipelineError::Derive(_) => "derive",
            PipelineError::Map { .. } => "map",
            PipelineError::UniqueViolation { .. } | PipelineError::Persist(_) => "persist",
            PipelineError::Export(_) => "export",
        }
    }

    pub fn read(source_name: &str, err: anyhow::Error) -> Self {
        PipelineError::Read {
            source_name: source_name.to_string(),
            message: format!("{:#}", err),
        }
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::Persist(err.to_string())
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
