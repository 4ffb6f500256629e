//! Configuration types for the SMLM pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::processors::aggregate::FailurePolicy;
use crate::processors::filtering::Threshold;

/// Column names of a raw localisation export, in file order.
pub const RAW_COLUMNS: [&str; 22] = [
    "x-nm",
    "y-nm",
    "frame",
    "channel",
    "duration-frames",
    "var-x-nm2",
    "var-y-nm2",
    "var-intensity-photons",
    "var-background-photons",
    "var-sigma-x-nm2",
    "var-sigma-y-nm2",
    "z-nm",
    "bg-mean-photons",
    "sigma-x-mean-nm",
    "sigma-y-mean-nm",
    "intensity-mean-photons",
    "presplit-channels-channel-index",
    "channel-group-index",
    "parent-id",
    "cluster-id",
    "outlier-score",
    "bleeding-distance-nm",
];

/// Configuration for table schemas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Ordered column names assigned to raw files
    #[serde(default = "default_raw_columns")]
    pub raw_columns: Vec<String>,

    /// Legacy column names renamed on load of pre-processed files
    #[serde(default = "default_column_aliases")]
    pub column_aliases: HashMap<String, String>,
}

fn default_raw_columns() -> Vec<String> {
    RAW_COLUMNS.iter().map(|c| c.to_string()).collect()
}

fn default_column_aliases() -> HashMap<String, String> {
    let mut aliases = HashMap::new();
    aliases.insert("locprec-nm".to_string(), "locprec-mean-nm".to_string());
    aliases.insert("psf-sigma-nm".to_string(), "psf-sigma-mean-nm".to_string());
    aliases.insert("sigma-y-mean".to_string(), "sigma-y-mean-nm".to_string());
    aliases
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            raw_columns: default_raw_columns(),
            column_aliases: default_column_aliases(),
        }
    }
}

/// Configuration for row filtering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Upper bounds applied in order; rows keep `value < upper`
    #[serde(default)]
    pub thresholds: Vec<Threshold>,
}

/// Configuration for multi-FOV aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateConfig {
    /// What to do when one file of a batch cannot be loaded
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Log progress every N files
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,

    /// Load the files of a condition in parallel
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

fn default_progress_every() -> usize {
    10
}

fn default_parallel() -> bool {
    true
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            progress_every: default_progress_every(),
            parallel: default_parallel(),
        }
    }
}

/// Configuration for charts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotConfig {
    /// Histogram bucket count
    #[serde(default = "default_bins")]
    pub bins: usize,

    /// Image width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Image height in pixels
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_bins() -> usize {
    30
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    800
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            bins: default_bins(),
            width: default_width(),
            height: default_height(),
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub schema: SchemaConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub aggregate: AggregateConfig,

    #[serde(default)]
    pub plot: PlotConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
