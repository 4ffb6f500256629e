//! Multi-FOV aggregation across experimental conditions.
//!
//! Each condition is one directory and each CSV file inside it is one field
//! of view. Every file is loaded and given derived metrics, and its
//! localisation count is recorded as a [`FovSummary`]. The summary always
//! follows condition order, then sorted file order, even when files are
//! loaded in parallel.

use std::path::{is_separator, Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::metrics::add_derived_metrics;
use crate::config::{AggregateConfig, SchemaConfig};
use crate::core::loaders::{list_fov_files, load_fov_csv, LoaderError, SchemaMode};
use crate::core::table::{FovTable, TableError};

/// Errors that can occur during aggregation.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("Condition directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: LoaderError,
    },

    #[error("Failed to derive metrics for {path}: {source}")]
    Derive {
        path: PathBuf,
        #[source]
        source: TableError,
    },

    #[error("Invalid condition '{0}': expected LABEL=DIR or DIR")]
    InvalidCondition(String),
}

/// Result type for aggregation operations.
pub type Result<T> = std::result::Result<T, AggregateError>;

/// Behaviour when one file of a batch fails to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the whole run on the first bad file.
    #[default]
    Abort,
    /// Log a warning, record the file as skipped and continue.
    Skip,
}

/// One experimental condition: a label and the directory holding its FOVs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub label: String,
    pub dir: PathBuf,
}

impl Condition {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(label: S, dir: P) -> Self {
        Self {
            label: label.into(),
            dir: dir.into(),
        }
    }

    /// Labels a condition by its directory name.
    pub fn from_dir<P: Into<PathBuf>>(dir: P) -> Self {
        let dir = dir.into();
        let label = dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        Self { label, dir }
    }
}

impl FromStr for Condition {
    type Err = AggregateError;

    /// Parses `LABEL=DIR`, or a bare `DIR` labelled by its name.
    ///
    /// An existing directory, or a part before `=` that holds a path
    /// separator, is read as a bare `DIR`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AggregateError::InvalidCondition(s.to_string()));
        }
        if Path::new(s).is_dir() {
            return Ok(Self::from_dir(s));
        }

        match s.split_once('=') {
            Some((label, dir)) if !label.contains(is_separator) => {
                let (label, dir) = (label.trim(), dir.trim());
                if label.is_empty() || dir.is_empty() {
                    return Err(AggregateError::InvalidCondition(s.to_string()));
                }
                Ok(Self::new(label, dir))
            }
            _ => Ok(Self::from_dir(s)),
        }
    }
}

/// Localisation count of one FOV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FovSummary {
    pub condition: String,
    pub fov: String,
    pub localisations: usize,
}

/// Loaded tables of one condition, in file order.
#[derive(Debug, Clone)]
pub struct ConditionTables {
    pub label: String,
    pub tables: Vec<FovTable>,
}

/// A file left out under [`FailurePolicy::Skip`].
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub condition: String,
    pub path: PathBuf,
    pub reason: String,
}

/// Output of a multi-FOV run.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub summary: Vec<FovSummary>,
    /// Empty unless `retain_tables` was set.
    pub tables: Vec<ConditionTables>,
    pub skipped: Vec<SkippedFile>,
}

impl Aggregation {
    /// Total localisations across every FOV.
    pub fn total_localisations(&self) -> usize {
        self.summary.iter().map(|s| s.localisations).sum()
    }
}

/// Options for [`aggregate_conditions`].
#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub mode: SchemaMode,
    pub schema: SchemaConfig,
    pub failure_policy: FailurePolicy,
    /// Keep every loaded table for follow-on plotting.
    pub retain_tables: bool,
    /// Log progress every N files; 0 disables it.
    pub progress_every: usize,
    pub parallel: bool,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self::from_config(&AggregateConfig::default(), SchemaConfig::default(), SchemaMode::Raw)
    }
}

impl AggregateOptions {
    pub fn from_config(config: &AggregateConfig, schema: SchemaConfig, mode: SchemaMode) -> Self {
        Self {
            mode,
            schema,
            failure_policy: config.failure_policy,
            retain_tables: false,
            progress_every: config.progress_every,
            parallel: config.parallel,
        }
    }
}

/// Load one FOV file and add its derived metrics.
pub fn load_with_metrics(path: &Path, mode: SchemaMode, schema: &SchemaConfig) -> Result<FovTable> {
    let mut table = load_fov_csv(path, mode, Some(schema)).map_err(|e| AggregateError::Load {
        path: path.to_path_buf(),
        source: e,
    })?;
    add_derived_metrics(&mut table).map_err(|e| AggregateError::Derive {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(table)
}

/// Progress notification passed to the aggregation callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress<'a> {
    /// Loading of a condition's files is about to start.
    Started { condition: &'a str, total: usize },
    /// One more file of the condition has been processed, successfully or
    /// not. `logged` is set on every `progress_every`-th file.
    File {
        condition: &'a str,
        done: usize,
        total: usize,
        logged: bool,
    },
}

/// Aggregate per-FOV localisation counts over several conditions.
///
/// See [`aggregate_conditions_with_progress`] for details.
pub fn aggregate_conditions(conditions: &[Condition], options: &AggregateOptions) -> Result<Aggregation> {
    aggregate_conditions_with_progress(conditions, options, |_| {})
}

/// Aggregate per-FOV localisation counts, reporting progress per file.
///
/// `on_progress` receives one [`Progress::Started`] per condition and one
/// [`Progress::File`] per processed file. File events may come from worker
/// threads, in completion order.
///
/// Only the summary row of each file is kept unless `retain_tables` is set.
///
/// # Errors
///
/// Returns `AggregateError::DirectoryNotFound` if any condition directory is
/// missing. Under [`FailurePolicy::Abort`] the run stops at the first load
/// or derive error: sequentially no later file is read, in parallel the
/// remaining work is cancelled.
pub fn aggregate_conditions_with_progress<F>(
    conditions: &[Condition],
    options: &AggregateOptions,
    on_progress: F,
) -> Result<Aggregation>
where
    F: Fn(Progress<'_>) + Sync,
{
    // Check every directory up front so a typo does not waste a long run.
    for condition in conditions {
        if !condition.dir.is_dir() {
            return Err(AggregateError::DirectoryNotFound(condition.dir.clone()));
        }
    }

    let mut aggregation = Aggregation::default();

    for condition in conditions {
        let files = list_fov_files(&condition.dir).map_err(|e| match e {
            LoaderError::NotFound(dir) => AggregateError::DirectoryNotFound(dir),
            other => AggregateError::Load {
                path: condition.dir.clone(),
                source: other,
            },
        })?;

        let label = condition.label.as_str();
        let total = files.len();
        info!(
            "Condition '{}': {} FOV files in {}",
            label,
            total,
            condition.dir.display()
        );
        on_progress(Progress::Started { condition: label, total });

        let done = AtomicUsize::new(0);
        let process = |path: &PathBuf| -> Result<(FovSummary, Option<FovTable>)> {
            let result = load_with_metrics(path, options.mode, &options.schema);

            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            let logged = options.progress_every > 0 && n % options.progress_every == 0;
            if logged {
                info!("Condition '{}': processed {}/{} files", label, n, total);
            }
            on_progress(Progress::File {
                condition: label,
                done: n,
                total,
                logged,
            });

            let table = result?;
            debug!("{}/{}: {} localisations", label, table.name(), table.num_rows());
            let summary = FovSummary {
                condition: label.to_string(),
                fov: table.name().to_string(),
                localisations: table.num_rows(),
            };
            Ok((summary, options.retain_tables.then_some(table)))
        };

        let processed: Vec<(FovSummary, Option<FovTable>)> =
            match (options.failure_policy, options.parallel) {
                (FailurePolicy::Abort, true) => files.par_iter().map(process).collect::<Result<Vec<_>>>()?,
                (FailurePolicy::Abort, false) => files.iter().map(process).collect::<Result<Vec<_>>>()?,
                (FailurePolicy::Skip, parallel) => {
                    let results: Vec<Result<(FovSummary, Option<FovTable>)>> = if parallel {
                        files.par_iter().map(process).collect()
                    } else {
                        files.iter().map(process).collect()
                    };

                    let mut kept = Vec::with_capacity(results.len());
                    for (path, result) in files.iter().zip(results) {
                        match result {
                            Ok(item) => kept.push(item),
                            Err(e) => {
                                warn!("Skipping {}: {}", path.display(), e);
                                aggregation.skipped.push(SkippedFile {
                                    condition: label.to_string(),
                                    path: path.clone(),
                                    reason: e.to_string(),
                                });
                            }
                        }
                    }
                    kept
                }
            };

        let mut retained = Vec::new();
        for (summary, table) in processed {
            aggregation.summary.push(summary);
            retained.extend(table);
        }

        if options.retain_tables {
            aggregation.tables.push(ConditionTables {
                label: label.to_string(),
                tables: retained,
            });
        }
    }

    info!(
        "Aggregation complete: {} FOVs, {} localisations, {} skipped",
        aggregation.summary.len(),
        aggregation.total_localisations(),
        aggregation.skipped.len()
    );

    Ok(aggregation)
}

/// Group localisation counts by condition, in first-seen order.
pub fn counts_by_condition(summary: &[FovSummary]) -> Vec<(String, Vec<f64>)> {
    let mut groups: Vec<(String, Vec<f64>)> = Vec::new();
    for record in summary {
        let count = record.localisations as f64;
        match groups.iter_mut().find(|(label, _)| *label == record.condition) {
            Some((_, counts)) => counts.push(count),
            None => groups.push((record.condition.clone(), vec![count])),
        }
    }
    groups
}
