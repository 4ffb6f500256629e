//! Column-major localisation tables.
//!
//! One [`FovTable`] holds every localisation of a single field of view. All
//! values are stored as `f64`, one vector per column, so every row shares the
//! same schema by construction.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised by table operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("column '{column}' not found in table '{table}'")]
    MissingColumn { table: String, column: String },

    #[error("row has {found} values but table '{table}' has {expected} columns")]
    RowLength {
        table: String,
        expected: usize,
        found: usize,
    },

    #[error("column '{column}' has {found} values but table '{table}' has {expected} rows")]
    ColumnLength {
        table: String,
        column: String,
        expected: usize,
        found: usize,
    },
}

/// Result type for table operations.
pub type Result<T> = std::result::Result<T, TableError>;

/// Localisation table for one field of view.
#[derive(Debug, Clone, PartialEq)]
pub struct FovTable {
    name: String,
    columns: Vec<String>,
    data: Vec<Vec<f64>>,
    source_path: Option<PathBuf>,
}

impl FovTable {
    /// Creates an empty table with the given column names.
    pub fn new<S: Into<String>>(name: S, columns: Vec<String>) -> Self {
        Self::with_capacity(name, columns, 0)
    }

    /// Creates an empty table with room for `capacity` rows per column.
    pub fn with_capacity<S: Into<String>>(name: S, columns: Vec<String>, capacity: usize) -> Self {
        let data = columns.iter().map(|_| Vec::with_capacity(capacity)).collect();
        Self {
            name: name.into(),
            columns,
            data,
            source_path: None,
        }
    }

    /// Attaches the file this table was read from.
    pub fn with_source<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.source_path = Some(path.as_ref().to_path_buf());
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[inline]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Returns the number of localisations.
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.data.first().map_or(0, |col| col.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    #[inline]
    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    /// Returns the values of a named column.
    pub fn column(&self, column: &str) -> Result<&[f64]> {
        self.column_index(column)
            .map(|idx| self.data[idx].as_slice())
            .ok_or_else(|| self.missing(column))
    }

    /// Iterates over `(name, values)` pairs in column order.
    pub fn iter_columns(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.data.iter().map(Vec::as_slice))
    }

    /// Appends one row; `values` must follow the column order.
    pub fn push_row(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(TableError::RowLength {
                table: self.name.clone(),
                expected: self.columns.len(),
                found: values.len(),
            });
        }
        for (col, &value) in self.data.iter_mut().zip(values) {
            col.push(value);
        }
        Ok(())
    }

    /// Returns the values of row `index` in column order.
    pub fn row(&self, index: usize) -> Option<Vec<f64>> {
        if index >= self.num_rows() {
            return None;
        }
        Some(self.data.iter().map(|col| col[index]).collect())
    }

    /// Adds a column, or replaces the values of an existing one.
    pub fn set_column<S: Into<String>>(&mut self, column: S, values: Vec<f64>) -> Result<()> {
        let column = column.into();
        // A table without columns has no row count yet.
        if !self.columns.is_empty() && values.len() != self.num_rows() {
            return Err(TableError::ColumnLength {
                table: self.name.clone(),
                column,
                expected: self.num_rows(),
                found: values.len(),
            });
        }
        match self.column_index(&column) {
            Some(idx) => self.data[idx] = values,
            None => {
                self.columns.push(column);
                self.data.push(values);
            }
        }
        Ok(())
    }

    /// Renames a column in place.
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        let idx = self.column_index(from).ok_or_else(|| self.missing(from))?;
        self.columns[idx] = to.to_string();
        Ok(())
    }

    /// Builds a new table holding the rows where `keep` is true.
    ///
    /// The source table is never modified; the result keeps the same name,
    /// columns and source path.
    pub fn select_rows(&self, keep: &[bool]) -> Self {
        debug_assert_eq!(keep.len(), self.num_rows(), "mask must cover every row");

        let data = self
            .data
            .iter()
            .map(|col| {
                col.iter()
                    .zip(keep)
                    .filter_map(|(&v, &k)| k.then_some(v))
                    .collect()
            })
            .collect();

        Self {
            name: self.name.clone(),
            columns: self.columns.clone(),
            data,
            source_path: self.source_path.clone(),
        }
    }

    fn missing(&self, column: &str) -> TableError {
        TableError::MissingColumn {
            table: self.name.clone(),
            column: column.to_string(),
        }
    }
}
