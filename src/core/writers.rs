//! CSV writers for localisation tables and cross-FOV summaries.
//!
//! FOV tables are written with a header row followed by one line per
//! localisation. Values use the shortest representation that reads back to
//! the same `f64`; `NaN` is written as an empty field.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::table::FovTable;
use crate::processors::aggregate::FovSummary;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a CSV writer over a buffered file.
fn create_csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(csv::Writer::from_writer(BufWriter::new(file)))
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

/// Write a localisation table to CSV with a header row.
///
/// Columns are written in table order, so derived columns follow the raw
/// ones. The file can be read back with `SchemaMode::Preprocessed`.
///
/// # Arguments
///
/// * `path` - Output file path (parent directories will be created if needed)
/// * `table` - Table to write
///
/// # Example
///
/// ```no_run
/// use smlm_pipeline::core::table::FovTable;
/// use smlm_pipeline::core::writers::write_fov_csv;
/// use std::path::Path;
///
/// let table = FovTable::new("fov1", vec!["x-nm".to_string()]);
/// write_fov_csv(Path::new("fov1.csv"), &table).unwrap();
/// ```
pub fn write_fov_csv(path: &Path, table: &FovTable) -> Result<()> {
    ensure_parent_dirs(path)?;
    let mut csv_writer = create_csv_writer(path)?;
    let path_str = path.display().to_string();

    csv_writer
        .write_record(table.columns())
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    let columns: Vec<&[f64]> = table.iter_columns().map(|(_, values)| values).collect();
    let mut fields = Vec::with_capacity(columns.len());
    for row in 0..table.num_rows() {
        fields.clear();
        fields.extend(columns.iter().map(|values| format_value(values[row])));
        csv_writer
            .write_record(&fields)
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}

/// Write a table as `<fov-name>.csv` inside `dir` and return the file path.
pub fn write_fov_to_dir(dir: &Path, table: &FovTable) -> Result<PathBuf> {
    let path = dir.join(format!("{}.csv", table.name()));
    write_fov_csv(&path, table)?;
    Ok(path)
}

/// Write the cross-FOV summary as `condition,fov,localisations` rows.
pub fn write_summary_csv(path: &Path, summary: &[FovSummary]) -> Result<()> {
    ensure_parent_dirs(path)?;
    let mut csv_writer = create_csv_writer(path)?;
    let path_str = path.display().to_string();

    // Serialising an empty slice would emit no header at all.
    if summary.is_empty() {
        csv_writer
            .write_record(["condition", "fov", "localisations"])
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    for record in summary {
        csv_writer
            .serialize(record)
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn create_test_table() -> FovTable {
        let mut table = FovTable::new(
            "fov7",
            vec!["x-nm".to_string(), "frame".to_string(), "locprec-mean-nm".to_string()],
        );
        table.push_row(&[1.25, 3.0, 2.5]).unwrap();
        table.push_row(&[2.0, 4.0, f64::NAN]).unwrap();
        table
    }

    #[test]
    fn test_write_fov_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fov7.csv");

        write_fov_csv(&path, &create_test_table()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["x-nm,frame,locprec-mean-nm", "1.25,3,2.5", "2,4,"]);
    }

    #[test]
    fn test_write_fov_to_dir_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let out_dir = dir.path().join("filtered").join("blank");

        let path = write_fov_to_dir(&out_dir, &create_test_table()).unwrap();

        assert_eq!(path, out_dir.join("fov7.csv"));
        assert!(path.exists());
    }

    #[test]
    fn test_write_summary_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        let summary = vec![
            FovSummary {
                condition: "blank".to_string(),
                fov: "fov1".to_string(),
                localisations: 120,
            },
            FovSummary {
                condition: "treated".to_string(),
                fov: "fov1".to_string(),
                localisations: 80,
            },
        ];

        write_summary_csv(&path, &summary).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "condition,fov,localisations");
        assert_eq!(lines[1], "blank,fov1,120");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_write_empty_summary_has_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.csv");

        write_summary_csv(&path, &[]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim_end(), "condition,fov,localisations");
    }
}
