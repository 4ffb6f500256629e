//! Data processing modules.

pub mod aggregate;
pub mod filtering;
pub mod metrics;
pub mod stats;

// Re-export key types for convenience
pub use aggregate::{
    aggregate_conditions, aggregate_conditions_with_progress, counts_by_condition,
    load_with_metrics, AggregateError, AggregateOptions, Aggregation, Condition, ConditionTables,
    FailurePolicy, FovSummary, Progress, SkippedFile,
};
pub use filtering::{
    apply_thresholds, filter_below, filter_directory, FilterOutcome, FilteringError, Threshold,
};
pub use metrics::{add_derived_metrics, has_derived_metrics, DERIVED_COLUMNS};
pub use stats::{describe, describe_table, ColumnStats};
