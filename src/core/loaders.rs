//! Loaders for per-FOV localisation CSV files.
//!
//! Two layouts are supported:
//! - Raw exports: a header comment line followed by the fixed 22-column schema
//! - Pre-processed tables: a standard header row naming every column,
//!   typically including the derived precision/PSF columns

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, warn};
use thiserror::Error;

use super::table::FovTable;
use crate::config::SchemaConfig;

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("Malformed row in {path} at line {line}: expected {expected} columns, found {found}")]
    Malformed {
        path: PathBuf,
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("Invalid value '{value}' for column '{column}' in {path} at line {line}")]
    Parse {
        path: PathBuf,
        line: u64,
        column: String,
        value: String,
    },
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// How the columns of a localisation CSV are determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaMode {
    /// First line discarded; columns come from the configured raw schema.
    #[default]
    Raw,
    /// Columns come from the file's own header row.
    Preprocessed,
}

/// Returns the FOV name for a file: its base name without extension.
pub fn fov_name_from_path<P: AsRef<Path>>(path: P) -> String {
    path.as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// List the FOV files of a condition directory.
///
/// The directory is read non-recursively. Only regular files with a `.csv`
/// extension are kept, sorted by path so iteration order is stable.
///
/// # Errors
///
/// Returns `LoaderError::NotFound` if `dir` is not an existing directory.
pub fn list_fov_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(LoaderError::NotFound(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if is_csv && path.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Load one FOV localisation table from a CSV file.
///
/// # Arguments
///
/// * `path` - Path to the CSV file
/// * `mode` - Whether the file is a raw export or a pre-processed table
/// * `schema` - Schema configuration (uses defaults if None)
///
/// # Returns
///
/// A `FovTable` named after the file stem, one row per data line.
///
/// # Errors
///
/// Returns `LoaderError::NotFound` if the file does not exist,
/// `LoaderError::Malformed` if a data row has the wrong number of fields,
/// and `LoaderError::Parse` if a field is not numeric.
pub fn load_fov_csv<P: AsRef<Path>>(
    path: P,
    mode: SchemaMode,
    schema: Option<&SchemaConfig>,
) -> Result<FovTable> {
    let path = path.as_ref();
    let default_schema = SchemaConfig::default();
    let schema = schema.unwrap_or(&default_schema);

    if !path.is_file() {
        return Err(LoaderError::NotFound(path.to_path_buf()));
    }

    let file = File::open(path)?;
    // Raw exports start with a comment line that is not a real header, so
    // it is consumed as one and ignored.
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(BufReader::with_capacity(64 * 1024, file));

    let name = fov_name_from_path(path);

    let (columns, keep) = match mode {
        SchemaMode::Raw => {
            let columns = schema.raw_columns.clone();
            let keep = vec![true; columns.len()];
            (columns, keep)
        }
        SchemaMode::Preprocessed => {
            let headers = reader.headers()?.clone();
            if headers.is_empty() || headers.iter().all(str::is_empty) {
                return Err(LoaderError::EmptyFile(path.to_path_buf()));
            }
            preprocessed_columns(&headers, schema, &name)
        }
    };

    let expected = keep.len();
    let mut table = FovTable::with_capacity(name, columns, 4096).with_source(path);
    let mut values = Vec::with_capacity(table.num_columns());
    let mut record = StringRecord::new();

    while reader.read_record(&mut record)? {
        let line = record.position().map_or(0, |p| p.line());

        if record.len() != expected {
            return Err(LoaderError::Malformed {
                path: path.to_path_buf(),
                line,
                expected,
                found: record.len(),
            });
        }

        values.clear();
        for (idx, field) in record.iter().enumerate() {
            if !keep[idx] {
                continue;
            }
            let value = parse_field(field).ok_or_else(|| LoaderError::Parse {
                path: path.to_path_buf(),
                line,
                column: table.columns()[values.len()].clone(),
                value: field.to_string(),
            })?;
            values.push(value);
        }

        let kept = values.len();
        table.push_row(&values).map_err(|_| LoaderError::Malformed {
            path: path.to_path_buf(),
            line,
            expected,
            found: kept,
        })?;
    }

    debug!(
        "Loaded {} localisations x {} columns from {}",
        table.num_rows(),
        table.num_columns(),
        path.display()
    );

    Ok(table)
}

/// Resolve header names of a pre-processed file.
///
/// Returns the canonical column names and a per-field keep mask; unnamed
/// fields (a written-out dataframe index) are dropped.
fn preprocessed_columns(
    headers: &StringRecord,
    schema: &SchemaConfig,
    fov: &str,
) -> (Vec<String>, Vec<bool>) {
    let mut columns = Vec::with_capacity(headers.len());
    let mut keep = Vec::with_capacity(headers.len());

    for header in headers.iter() {
        if header.is_empty() {
            debug!("Dropping unnamed index column in {}", fov);
            keep.push(false);
            continue;
        }
        let canonical = match schema.column_aliases.get(header) {
            Some(alias) => {
                warn!("Renaming legacy column '{}' to '{}' in {}", header, alias, fov);
                alias.clone()
            }
            None => header.to_string(),
        };
        columns.push(canonical);
        keep.push(true);
    }

    (columns, keep)
}

/// Parse one numeric field; empty fields become NaN.
fn parse_field(field: &str) -> Option<f64> {
    if field.is_empty() {
        return Some(f64::NAN);
    }
    field.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn raw_row(var_x: f64, var_y: f64, sigma_x: f64, sigma_y: f64) -> String {
        let mut fields = vec!["0".to_string(); 22];
        fields[5] = var_x.to_string();
        fields[6] = var_y.to_string();
        fields[13] = sigma_x.to_string();
        fields[14] = sigma_y.to_string();
        fields.join(",")
    }

    #[test]
    fn test_fov_name_from_path() {
        assert_eq!(fov_name_from_path("/data/blank/Blank_fov1.csv"), "Blank_fov1");
        assert_eq!(fov_name_from_path("fov2"), "fov2");
    }

    #[test]
    fn test_load_raw_csv() -> Result<()> {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# exported localisations, 22 columns").unwrap();
        for _ in 0..3 {
            writeln!(file, "{}", raw_row(4.0, 9.0, 120.0, 130.0)).unwrap();
        }
        file.flush().unwrap();

        let table = load_fov_csv(file.path(), SchemaMode::Raw, None)?;
        assert_eq!(table.num_rows(), 3);
        assert_eq!(table.num_columns(), 22);
        assert_eq!(table.column("var-x-nm2").unwrap(), &[4.0, 4.0, 4.0]);
        assert_eq!(table.column("sigma-y-mean-nm").unwrap()[0], 130.0);
        assert_eq!(table.source_path(), Some(file.path()));

        Ok(())
    }

    #[test]
    fn test_load_raw_header_only_is_empty_table() -> Result<()> {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "header comment").unwrap();
        file.flush().unwrap();

        let table = load_fov_csv(file.path(), SchemaMode::Raw, None)?;
        assert!(table.is_empty());
        assert_eq!(table.num_columns(), 22);

        Ok(())
    }

    #[test]
    fn test_load_raw_wrong_column_count() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "header").unwrap();
        writeln!(file, "{}", raw_row(1.0, 1.0, 1.0, 1.0)).unwrap();
        writeln!(file, "1,2,3").unwrap();
        file.flush().unwrap();

        match load_fov_csv(file.path(), SchemaMode::Raw, None) {
            Err(LoaderError::Malformed {
                line,
                expected,
                found,
                ..
            }) => {
                assert_eq!(line, 3);
                assert_eq!(expected, 22);
                assert_eq!(found, 3);
            }
            other => panic!("Expected Malformed error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_non_numeric_field() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "a,b").unwrap();
        writeln!(file, "1.0,abc").unwrap();
        file.flush().unwrap();

        match load_fov_csv(file.path(), SchemaMode::Preprocessed, None) {
            Err(LoaderError::Parse { column, value, .. }) => {
                assert_eq!(column, "b");
                assert_eq!(value, "abc");
            }
            other => panic!("Expected Parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.csv");

        assert!(matches!(
            load_fov_csv(&path, SchemaMode::Raw, None),
            Err(LoaderError::NotFound(p)) if p == path
        ));
    }

    #[test]
    fn test_load_preprocessed_with_aliases_and_index() -> Result<()> {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, ",x-nm,locprec-nm,psf-sigma-nm").unwrap();
        writeln!(file, "0,10.5,12.0,140.0").unwrap();
        writeln!(file, "1,11.5,,150.0").unwrap();
        file.flush().unwrap();

        let table = load_fov_csv(file.path(), SchemaMode::Preprocessed, None)?;
        assert_eq!(table.columns(), &["x-nm", "locprec-mean-nm", "psf-sigma-mean-nm"]);
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.column("x-nm").unwrap(), &[10.5, 11.5]);
        assert!(table.column("locprec-mean-nm").unwrap()[1].is_nan());

        Ok(())
    }

    #[test]
    fn test_load_preprocessed_empty_file() {
        let file = NamedTempFile::new().unwrap();
        assert!(matches!(
            load_fov_csv(file.path(), SchemaMode::Preprocessed, None),
            Err(LoaderError::EmptyFile(_))
        ));
    }

    #[test]
    fn test_list_fov_files_sorted_csv_only() -> Result<()> {
        let dir = TempDir::new().unwrap();
        for name in ["fov2.csv", "fov1.CSV", "notes.txt"] {
            File::create(dir.path().join(name)).unwrap();
        }
        fs::create_dir(dir.path().join("nested.csv")).unwrap();

        let files = list_fov_files(dir.path())?;
        let names: Vec<String> = files.iter().map(fov_name_from_path).collect();
        assert_eq!(names, vec!["fov1", "fov2"]);

        Ok(())
    }

    #[test]
    fn test_list_fov_files_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            list_fov_files(dir.path().join("nope")),
            Err(LoaderError::NotFound(_))
        ));
    }
}
