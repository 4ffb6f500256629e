//! Row filtering by per-column upper bounds.
//!
//! A [`Threshold`] keeps rows whose value is strictly below its bound. Filters
//! never modify their input: each returns a new table holding a row subset.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::metrics::{add_derived_metrics, has_derived_metrics};
use crate::config::SchemaConfig;
use crate::core::loaders::{list_fov_files, load_fov_csv, LoaderError, SchemaMode};
use crate::core::table::{FovTable, Result as TableResult, TableError};
use crate::core::writers::{write_fov_to_dir, WriteError};

/// Errors that can occur during filtering operations.
#[derive(Debug, Error)]
pub enum FilteringError {
    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error(transparent)]
    Load(#[from] LoaderError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("Invalid threshold '{0}': expected COLUMN=BOUND")]
    InvalidThreshold(String),
}

/// Keep rows where `column < upper`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub column: String,
    pub upper: f64,
}

impl Threshold {
    pub fn new<S: Into<String>>(column: S, upper: f64) -> Self {
        Self {
            column: column.into(),
            upper,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} < {}", self.column, self.upper)
    }
}

impl FromStr for Threshold {
    type Err = FilteringError;

    /// Parses `COLUMN=BOUND`, e.g. `locprec-mean-nm=15`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FilteringError::InvalidThreshold(s.to_string());
        let (column, bound) = s.rsplit_once('=').ok_or_else(invalid)?;
        let column = column.trim();
        if column.is_empty() {
            return Err(invalid());
        }
        let upper: f64 = bound.trim().parse().map_err(|_| invalid())?;
        Ok(Self::new(column, upper))
    }
}

/// Result of filtering one FOV file.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub fov: String,
    pub rows_in: usize,
    pub rows_out: usize,
    /// Written file, or `None` on a dry run.
    pub output: Option<PathBuf>,
}

/// Return a new table holding the rows with `column < upper`.
///
/// `NaN` values never satisfy the bound. An empty result is valid.
///
/// # Errors
///
/// Returns `TableError::MissingColumn` if `column` is absent.
pub fn filter_below(table: &FovTable, column: &str, upper: f64) -> TableResult<FovTable> {
    let keep: Vec<bool> = table.column(column)?.iter().map(|&v| v < upper).collect();
    Ok(table.select_rows(&keep))
}

/// Apply thresholds in order, each narrowing the previous result.
pub fn apply_thresholds(table: &FovTable, thresholds: &[Threshold]) -> TableResult<FovTable> {
    // Validate every column first so a bad chain fails before any work.
    for threshold in thresholds {
        table.column(&threshold.column)?;
    }

    let mut current = table.clone();
    for threshold in thresholds {
        current = filter_below(&current, &threshold.column, threshold.upper)?;
        debug!(
            "{}: {} rows remain after {}",
            current.name(),
            current.num_rows(),
            threshold
        );
    }
    Ok(current)
}

/// Filter every FOV file of a directory and write the survivors back to CSV.
///
/// Each file is loaded, given derived metrics if it lacks them, filtered by
/// `thresholds`, and written as `<fov-name>.csv` in `output_dir`.
///
/// # Arguments
///
/// * `input_dir` - Directory of FOV CSV files
/// * `output_dir` - Destination directory (created if needed)
/// * `mode` - Schema mode of the input files
/// * `thresholds` - Filter chain
/// * `schema` - Schema configuration (uses defaults if None)
/// * `dry_run` - If true, only report what would be written
///
/// # Returns
///
/// One `FilterOutcome` per input file, in file order.
pub fn filter_directory(
    input_dir: &Path,
    output_dir: &Path,
    mode: SchemaMode,
    thresholds: &[Threshold],
    schema: Option<&SchemaConfig>,
    dry_run: bool,
) -> Result<Vec<FilterOutcome>, FilteringError> {
    if !input_dir.is_dir() {
        return Err(FilteringError::DirectoryNotFound(input_dir.to_path_buf()));
    }

    let files = list_fov_files(input_dir)?;
    let mut outcomes = Vec::with_capacity(files.len());

    for path in files {
        let mut table = load_fov_csv(&path, mode, schema)?;
        if !has_derived_metrics(&table) {
            add_derived_metrics(&mut table)?;
        }

        let filtered = apply_thresholds(&table, thresholds)?;

        let output = if dry_run {
            None
        } else {
            Some(write_fov_to_dir(output_dir, &filtered)?)
        };

        info!(
            "{}: kept {}/{} localisations",
            table.name(),
            filtered.num_rows(),
            table.num_rows()
        );

        outcomes.push(FilterOutcome {
            fov: table.name().to_string(),
            rows_in: table.num_rows(),
            rows_out: filtered.num_rows(),
            output,
        });
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::metrics::LOCPREC_MEAN_COL;
    use std::fs;
    use tempfile::TempDir;

    fn precision_table(n: usize) -> FovTable {
        let mut table = FovTable::new("fov1", Vec::new());
        let locprec: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let outlier: Vec<f64> = (0..n).map(|i| (i % 2) as f64).collect();
        table.set_column(LOCPREC_MEAN_COL, locprec).unwrap();
        table.set_column("outlier-score", outlier).unwrap();
        table
    }

    fn write_preprocessed(dir: &Path, name: &str, locprec: &[f64]) {
        let mut content = String::from("x-nm,var-x-nm2,var-y-nm2,sigma-x-mean-nm,sigma-y-mean-nm\n");
        for (i, lp) in locprec.iter().enumerate() {
            // var = lp^2 on both axes gives locprec-mean-nm == lp
            let var = lp * lp;
            content.push_str(&format!("{},{},{},100,100\n", i, var, var));
        }
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_filter_below_strict() {
        let table = precision_table(100);
        let filtered = filter_below(&table, LOCPREC_MEAN_COL, 10.0).unwrap();

        assert_eq!(filtered.num_rows(), 10);
        let max = filtered
            .column(LOCPREC_MEAN_COL)
            .unwrap()
            .iter()
            .cloned()
            .fold(f64::MIN, f64::max);
        assert!(max < 10.0);
        assert_eq!(table.num_rows(), 100);
    }

    #[test]
    fn test_filter_below_idempotent() {
        let table = precision_table(50);
        let once = filter_below(&table, LOCPREC_MEAN_COL, 20.0).unwrap();
        let twice = filter_below(&once, LOCPREC_MEAN_COL, 20.0).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_filter_below_drops_nan_and_allows_empty() {
        let mut table = FovTable::new("fov", Vec::new());
        table.set_column("v", vec![f64::NAN, 5.0]).unwrap();

        assert_eq!(filter_below(&table, "v", 6.0).unwrap().num_rows(), 1);
        assert!(filter_below(&table, "v", 0.0).unwrap().is_empty());
    }

    #[test]
    fn test_filter_missing_column() {
        let table = precision_table(3);
        assert!(matches!(
            filter_below(&table, "nope", 1.0),
            Err(TableError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_apply_thresholds_composes() {
        let table = precision_table(100);
        let thresholds = vec![
            Threshold::new(LOCPREC_MEAN_COL, 10.0),
            Threshold::new("outlier-score", 0.5),
        ];

        let filtered = apply_thresholds(&table, &thresholds).unwrap();
        // Even locprec values 0, 2, ..., 8
        assert_eq!(filtered.column(LOCPREC_MEAN_COL).unwrap(), &[0.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_apply_thresholds_validates_all_columns_first() {
        let table = precision_table(10);
        let thresholds = vec![
            Threshold::new(LOCPREC_MEAN_COL, 0.0),
            Threshold::new("missing", 1.0),
        ];
        assert!(apply_thresholds(&table, &thresholds).is_err());
    }

    #[test]
    fn test_threshold_from_str() {
        let t: Threshold = "locprec-mean-nm=15".parse().unwrap();
        assert_eq!(t, Threshold::new("locprec-mean-nm", 15.0));

        let t: Threshold = " outlier-score = 0.25 ".parse().unwrap();
        assert_eq!(t, Threshold::new("outlier-score", 0.25));

        assert!("locprec".parse::<Threshold>().is_err());
        assert!("=3".parse::<Threshold>().is_err());
        assert!("col=abc".parse::<Threshold>().is_err());
    }

    #[test]
    fn test_filter_directory_writes_survivors() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_preprocessed(input.path(), "fov1.csv", &[5.0, 20.0, 10.0]);
        write_preprocessed(input.path(), "fov2.csv", &[30.0]);

        let thresholds = vec![Threshold::new(LOCPREC_MEAN_COL, 15.0)];
        let outcomes = filter_directory(
            input.path(),
            output.path(),
            SchemaMode::Preprocessed,
            &thresholds,
            None,
            false,
        )
        .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].fov, "fov1");
        assert_eq!((outcomes[0].rows_in, outcomes[0].rows_out), (3, 2));
        assert_eq!((outcomes[1].rows_in, outcomes[1].rows_out), (1, 0));

        let written = fs::read_to_string(output.path().join("fov1.csv")).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("locprec-mean-nm,locprec-max-nm,psf-sigma-mean-nm"));
        assert!(output.path().join("fov2.csv").exists());
    }

    #[test]
    fn test_filter_directory_dry_run() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_preprocessed(input.path(), "fov1.csv", &[5.0]);

        let outcomes = filter_directory(
            input.path(),
            output.path(),
            SchemaMode::Preprocessed,
            &[],
            None,
            true,
        )
        .unwrap();

        assert_eq!(outcomes[0].output, None);
        assert!(!output.path().join("fov1.csv").exists());
    }

    #[test]
    fn test_filter_directory_missing() {
        let temp = TempDir::new().unwrap();
        let result = filter_directory(
            &temp.path().join("missing"),
            temp.path(),
            SchemaMode::Raw,
            &[],
            None,
            true,
        );
        assert!(matches!(result, Err(FilteringError::DirectoryNotFound(_))));
    }
}
