// ⚙️ Batch Configuration - everything the run needs, loaded once from TOML
// Sources, rename tables, fill rules, corrections, merge plan, database, export

use crate::corrections::CorrectionRule;
use crate::error::{PipelineError, PipelineResult};
use crate::gap_fill::FillRule;
use crate::merge::MergePlan;
use crate::normalize::RenameTable;
use crate::sources::{detect_format, SourceFormat};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Overrides `[database] path` when set
pub const DB_PATH_ENV: &str = "CUSTOMER_UNIFY_DB";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub corrections: Vec<CorrectionRule>,
    #[serde(default)]
    pub merge: MergePlan,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub output: OutputConfig,

    /// Directory relative paths resolve against (the config file's folder)
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// Detected from the file extension when omitted
    #[serde(default)]
    pub format: Option<SourceFormat>,
    pub path: PathBuf,
    #[serde(default)]
    pub rename: RenameTable,
    #[serde(default)]
    pub fill: Vec<FillRule>,
}

impl SourceConfig {
    pub fn resolved_format(&self) -> PipelineResult<SourceFormat> {
        match self.format {
            Some(format) => Ok(format),
            None => detect_format(&self.path).map_err(|e| {
                PipelineError::Config(format!("source '{}': {}", self.name, e))
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Write the unified table here as CSV
    #[serde(default)]
    pub csv: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl BatchConfig {
    /// Parse and validate; relative paths resolve against the working directory
    pub fn from_toml(content: &str) -> PipelineResult<Self> {
        let config: BatchConfig = toml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("config parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; relative paths resolve against its directory
    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_toml(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Resolve a configured path
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Database file, honouring the environment override
    pub fn database_path(&self) -> PathBuf {
        match std::env::var_os(DB_PATH_ENV) {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => self.resolve(&self.database.path),
        }
    }

    pub fn export_path(&self) -> Option<PathBuf> {
        self.output.csv.as_deref().map(|p| self.resolve(p))
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    fn validate(&self) -> PipelineResult<()> {
        let invalid = |msg: String| Err(PipelineError::Config(msg));

        if self.sources.is_empty() {
            return invalid("no sources configured".to_string());
        }

        let mut names = HashSet::new();
        let mut tabular = HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return invalid(format!("duplicate source name '{}'", source.name));
            }
            if source.resolved_format()?.is_tabular() {
                tabular.insert(source.name.as_str());
            }
        }

        let mut referenced = vec![&self.merge.base];
        referenced.extend(self.merge.steps.iter().map(|s| &s.with));
        for name in referenced {
            if !tabular.contains(name.as_str()) {
                return invalid(format!(
                    "merge plan references '{}', which is not a tabular source",
                    name
                ));
            }
        }

        for (i, step) in self.merge.steps.iter().enumerate() {
            if step.on.is_empty() {
                return invalid(format!("merge step {} has no key fields", i + 1));
            }
        }

        let mut rule_ids = HashSet::new();
        for rule in &self.corrections {
            if !rule_ids.insert(rule.id.as_str()) {
                return invalid(format!("duplicate correction id '{}'", rule.id));
            }
            if rule.matches.is_empty() {
                return invalid(format!("correction '{}' has an empty match", rule.id));
            }
            if rule.sources.is_empty() {
                return invalid(format!("correction '{}' names no sources", rule.id));
            }
            for source in &rule.sources {
                if !tabular.contains(source.as_str()) {
                    return invalid(format!(
                        "correction '{}' targets unknown source '{}'",
                        rule.id, source
                    ));
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
