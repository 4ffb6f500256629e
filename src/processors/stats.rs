//! Per-column summary statistics.
//!
//! Note: `NaN` values are excluded from every statistic and only counted.

use crate::core::table::FovTable;

/// Summary of one numeric column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    pub column: String,
    /// Finite or infinite values used for the statistics.
    pub count: usize,
    pub missing: usize,
    pub mean: f64,
    /// Sample standard deviation (n - 1).
    pub std: f64,
    pub min: f64,
    pub median: f64,
    pub max: f64,
}

pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Compute count, mean, std, min, median and max of a column.
pub fn describe(column: &str, values: &[f64]) -> ColumnStats {
    let mut present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    let count = present.len();
    let missing = values.len() - count;

    if count == 0 {
        return ColumnStats {
            column: column.to_string(),
            count,
            missing,
            mean: f64::NAN,
            std: f64::NAN,
            min: f64::NAN,
            median: f64::NAN,
            max: f64::NAN,
        };
    }

    let mean = present.iter().sum::<f64>() / count as f64;
    let std = if count > 1 {
        let ss: f64 = present.iter().map(|v| (v - mean).powi(2)).sum();
        (ss / (count - 1) as f64).sqrt()
    } else {
        f64::NAN
    };
    let min = present.iter().copied().fold(f64::INFINITY, f64::min);
    let max = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let median = median(&mut present);

    ColumnStats {
        column: column.to_string(),
        count,
        missing,
        mean,
        std,
        min,
        median,
        max,
    }
}

/// Describe every column of a table, in column order.
pub fn describe_table(table: &FovTable) -> Vec<ColumnStats> {
    table
        .iter_columns()
        .map(|(name, values)| describe(name, values))
        .collect()
}
