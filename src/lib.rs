//! Single-molecule localisation microscopy (SMLM) table pipeline.
//!
//! This crate provides tools for:
//! - Loading raw and pre-processed localisation CSV files, one per field of view
//! - Deriving localisation precision and PSF width columns (parallelized)
//! - Filtering localisations by per-column upper bounds
//! - Aggregating per-FOV localisation counts across experimental conditions
//! - Histogram, box plot and scatter charts of the results
//!
//! # Example
//!
//! ```no_run
//! use smlm_pipeline::core::loaders::{load_fov_csv, SchemaMode};
//! use smlm_pipeline::processors::{add_derived_metrics, filter_below};
//!
//! let mut table = load_fov_csv("fov1.csv", SchemaMode::Raw, None).unwrap();
//! add_derived_metrics(&mut table).unwrap();
//! let precise = filter_below(&table, "locprec-mean-nm", 15.0).unwrap();
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod visualization;

pub use config::{AggregateConfig, FilterConfig, PipelineConfig, PlotConfig, SchemaConfig};
pub use core::loaders::SchemaMode;
pub use core::table::FovTable;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
