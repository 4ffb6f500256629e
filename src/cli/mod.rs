//! Command-line interface for the SMLM pipeline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::loaders::{load_fov_csv, SchemaMode};
use crate::core::table::FovTable;
use crate::core::writers::write_summary_csv;
use crate::processors::aggregate::{
    aggregate_conditions_with_progress, counts_by_condition, AggregateOptions, Aggregation,
    Condition, FailurePolicy, Progress,
};
use crate::processors::filtering::{filter_directory, Threshold};
use crate::processors::metrics::{add_derived_metrics, has_derived_metrics};
use crate::processors::stats::describe_table;
use crate::visualization::{self, group_column_by, PlotOptions};
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "smlm-pipeline")]
#[command(about = "Single-molecule localisation table processing pipeline", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load one FOV file and print per-column statistics
    Inspect {
        /// FOV CSV file
        file: PathBuf,
        /// File carries its own header row
        #[arg(long)]
        preprocessed: bool,
    },

    /// Plot a histogram of one column of a FOV file
    Histogram {
        /// FOV CSV file
        file: PathBuf,
        /// Column to plot (raw or derived)
        #[arg(long)]
        column: String,
        /// Number of bins
        #[arg(long)]
        bins: Option<usize>,
        /// Clamp the histogram to LO HI
        #[arg(long, num_args = 2, value_names = ["LO", "HI"], allow_negative_numbers = true)]
        range: Option<Vec<f64>>,
        /// Box plot the column grouped by this column instead
        #[arg(long)]
        group_by: Option<String>,
        /// Output image (.png or .svg; defaults to <file>_<column>.png)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// File carries its own header row
        #[arg(long)]
        preprocessed: bool,
    },

    /// Filter every FOV file of a directory by column upper bounds
    Filter {
        /// Directory of FOV CSV files
        input_dir: PathBuf,
        /// Directory for the filtered CSV files
        output_dir: PathBuf,
        /// Keep rows with COLUMN < BOUND (repeatable; adds to the config)
        #[arg(long = "below", value_name = "COLUMN=BOUND")]
        below: Vec<Threshold>,
        /// Input files carry their own header row
        #[arg(long)]
        preprocessed: bool,
        /// Preview without writing files
        #[arg(long)]
        dry_run: bool,
    },

    /// Summarise localisation counts per FOV across conditions
    Aggregate {
        /// Condition directories as LABEL=DIR or DIR
        #[arg(required = true)]
        conditions: Vec<Condition>,
        /// Write the per-FOV summary CSV here
        #[arg(long)]
        summary: Option<PathBuf>,
        /// Box plot of localisation counts per condition
        #[arg(long)]
        boxplot: Option<PathBuf>,
        /// Scatter of condition vs. localisation count
        #[arg(long)]
        scatter: Option<PathBuf>,
        /// Per-FOV histogram overlay of --overlay-column
        #[arg(long, requires = "overlay_column")]
        overlay: Option<PathBuf>,
        /// Column for the overlay histogram
        #[arg(long)]
        overlay_column: Option<String>,
        /// Skip unreadable files instead of aborting
        #[arg(long)]
        skip_bad: bool,
        /// Input files carry their own header row
        #[arg(long)]
        preprocessed: bool,
    },
}

fn schema_mode(preprocessed: bool) -> SchemaMode {
    if preprocessed {
        SchemaMode::Preprocessed
    } else {
        SchemaMode::Raw
    }
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Create a bar for per-file progress
fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb
}

/// Restart the bar for each condition and step it once per file.
///
/// File events arrive in completion order, so the bar counts them rather
/// than trusting their `done` value.
fn advance_bar(pb: &ProgressBar, progress: Progress<'_>) {
    match progress {
        Progress::Started { condition, total } => {
            pb.set_length(total as u64);
            pb.set_position(0);
            pb.set_message(condition.to_string());
        }
        Progress::File { .. } => pb.inc(1),
    }
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

fn fail(context: &str, e: impl std::fmt::Display) -> ! {
    error!("{}: {}", context, e);
    std::process::exit(1);
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
                PipelineConfig::default()
            }
        },
        None => PipelineConfig::default(),
    };

    // Dispatch to subcommands
    match cli.command {
        Commands::Inspect { file, preprocessed } => {
            cmd_inspect(&file, schema_mode(preprocessed), &config);
        }
        Commands::Histogram { file, column, bins, range, group_by, output, preprocessed } => {
            cmd_histogram(
                &file,
                &column,
                bins,
                range,
                group_by.as_deref(),
                output,
                schema_mode(preprocessed),
                &config,
            );
        }
        Commands::Filter { input_dir, output_dir, below, preprocessed, dry_run } => {
            cmd_filter(&input_dir, &output_dir, below, schema_mode(preprocessed), dry_run, &config);
        }
        Commands::Aggregate {
            conditions,
            summary,
            boxplot,
            scatter,
            overlay,
            overlay_column,
            skip_bad,
            preprocessed,
        } => {
            let outputs = AggregateOutputs { summary, boxplot, scatter, overlay, overlay_column };
            cmd_aggregate(&conditions, &outputs, skip_bad, schema_mode(preprocessed), &config);
        }
    }
}

/// Load a FOV file and add derived metrics if it lacks them.
fn load_for_display(file: &Path, mode: SchemaMode, config: &PipelineConfig) -> FovTable {
    let mut table = match load_fov_csv(file, mode, Some(&config.schema)) {
        Ok(t) => t,
        Err(e) => fail("Failed to load FOV file", e),
    };
    if !has_derived_metrics(&table) {
        if let Err(e) = add_derived_metrics(&mut table) {
            fail("Failed to derive metrics", e);
        }
    }
    table
}

fn cmd_inspect(file: &Path, mode: SchemaMode, config: &PipelineConfig) {
    let start = Instant::now();
    let spinner = create_spinner("Loading FOV table...");
    let table = load_for_display(file, mode, config);
    spinner.finish_and_clear();

    println!("{} ({} localisations)", table.name(), table.num_rows());
    println!(
        "{:<34} {:>8} {:>8} {:>12} {:>12} {:>12} {:>12} {:>12}",
        "column", "count", "missing", "mean", "std", "min", "median", "max"
    );
    for stats in describe_table(&table) {
        println!(
            "{:<34} {:>8} {:>8} {:>12.3} {:>12.3} {:>12.3} {:>12.3} {:>12.3}",
            stats.column,
            stats.count,
            stats.missing,
            stats.mean,
            stats.std,
            stats.min,
            stats.median,
            stats.max
        );
    }

    print_summary(
        "Inspect Complete",
        &[
            ("File", file.display().to_string()),
            ("Localisations", table.num_rows().to_string()),
            ("Columns", table.num_columns().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
}

#[allow(clippy::too_many_arguments)]
fn cmd_histogram(
    file: &Path,
    column: &str,
    bins: Option<usize>,
    range: Option<Vec<f64>>,
    group_by: Option<&str>,
    output: Option<PathBuf>,
    mode: SchemaMode,
    config: &PipelineConfig,
) {
    let start = Instant::now();

    let output_path = output.unwrap_or_else(|| {
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "fov".to_string());
        file.with_file_name(format!("{}_{}.png", stem, column))
    });

    let table = load_for_display(file, mode, config);

    let mut opts = PlotOptions::from_config(&config.plot);
    if let Some(b) = bins {
        opts.bins = b;
    }
    opts.range = range.and_then(|r| match r.as_slice() {
        [lo, hi] => Some((*lo, *hi)),
        _ => None,
    });
    opts.title = Some(table.name().to_string());
    opts.value_label = Some(column.to_string());

    let spinner = create_spinner("Generating plot...");

    let result = match group_by {
        Some(group_column) => match group_column_by(&table, column, group_column) {
            Ok(groups) => visualization::plot_grouped_boxplot(&output_path, &groups, &opts),
            Err(e) => {
                spinner.finish_and_clear();
                fail("Failed to group column", e);
            }
        },
        None => match table.column(column) {
            Ok(values) => visualization::plot_histogram(&output_path, values, &opts),
            Err(e) => {
                spinner.finish_and_clear();
                fail("Failed to read column", e);
            }
        },
    };

    spinner.finish_and_clear();

    match result {
        Ok(()) => print_summary(
            "Histogram Complete",
            &[
                ("Input file", file.display().to_string()),
                ("Column", column.to_string()),
                ("Group by", group_by.unwrap_or("-").to_string()),
                ("Bins", opts.bins.to_string()),
                ("Output", output_path.display().to_string()),
                ("Duration", format!("{:.2?}", start.elapsed())),
            ],
        ),
        Err(e) => fail("Visualization failed", e),
    }
}

fn cmd_filter(
    input_dir: &Path,
    output_dir: &Path,
    below: Vec<Threshold>,
    mode: SchemaMode,
    dry_run: bool,
    config: &PipelineConfig,
) {
    let start = Instant::now();

    if dry_run {
        println!("DRY RUN: No files will be written");
    }

    let mut thresholds = config.filter.thresholds.clone();
    thresholds.extend(below);
    if thresholds.is_empty() {
        warn!("No thresholds given; files are copied unchanged with derived metrics");
    }
    for threshold in &thresholds {
        println!("Keeping rows with {}", threshold);
    }

    let spinner = create_spinner("Filtering FOV files...");

    match filter_directory(input_dir, output_dir, mode, &thresholds, Some(&config.schema), dry_run) {
        Ok(outcomes) => {
            spinner.finish_and_clear();

            let rows_in: usize = outcomes.iter().map(|o| o.rows_in).sum();
            let rows_out: usize = outcomes.iter().map(|o| o.rows_out).sum();

            print_summary(
                "Filter Complete",
                &[
                    ("Input directory", input_dir.display().to_string()),
                    ("Output directory", output_dir.display().to_string()),
                    ("FOV files", outcomes.len().to_string()),
                    ("Localisations in", rows_in.to_string()),
                    ("Localisations kept", rows_out.to_string()),
                    ("Dry run", dry_run.to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            spinner.finish_and_clear();
            fail("Filtering failed", e);
        }
    }
}

struct AggregateOutputs {
    summary: Option<PathBuf>,
    boxplot: Option<PathBuf>,
    scatter: Option<PathBuf>,
    overlay: Option<PathBuf>,
    overlay_column: Option<String>,
}

fn cmd_aggregate(
    conditions: &[Condition],
    outputs: &AggregateOutputs,
    skip_bad: bool,
    mode: SchemaMode,
    config: &PipelineConfig,
) {
    let start = Instant::now();

    let mut options = AggregateOptions::from_config(&config.aggregate, config.schema.clone(), mode);
    if skip_bad {
        options.failure_policy = FailurePolicy::Skip;
    }
    options.retain_tables = outputs.overlay.is_some();

    for condition in conditions {
        println!("Condition '{}': {}", condition.label, condition.dir.display());
    }

    let pb = create_progress_bar(0);
    let result =
        aggregate_conditions_with_progress(conditions, &options, |progress| advance_bar(&pb, progress));
    pb.finish_and_clear();

    let aggregation = match result {
        Ok(a) => a,
        Err(e) => fail("Aggregation failed", e),
    };

    if let Err(e) = write_aggregation_outputs(&aggregation, outputs, config) {
        fail("Failed to write aggregation outputs", format!("{:#}", e));
    }

    let mut items = vec![
        ("Conditions", conditions.len().to_string()),
        ("FOVs", aggregation.summary.len().to_string()),
        ("Localisations", aggregation.total_localisations().to_string()),
        ("Skipped files", aggregation.skipped.len().to_string()),
    ];
    for (label, counts) in counts_by_condition(&aggregation.summary) {
        let total: f64 = counts.iter().sum();
        items.push(("Condition", format!("{}: {} FOVs, {} locs", label, counts.len(), total)));
    }
    if let Some(path) = &outputs.summary {
        items.push(("Summary CSV", path.display().to_string()));
    }
    items.push(("Duration", format!("{:.2?}", start.elapsed())));

    print_summary("Aggregation Complete", &items);
}

/// Write the summary CSV and every requested chart.
fn write_aggregation_outputs(
    aggregation: &Aggregation,
    outputs: &AggregateOutputs,
    config: &PipelineConfig,
) -> Result<()> {
    if let Some(path) = &outputs.summary {
        write_summary_csv(path, &aggregation.summary)?;
        info!("Wrote summary to {}", path.display());
    }

    let counts = counts_by_condition(&aggregation.summary);

    let mut opts = PlotOptions::from_config(&config.plot);
    opts.value_label = Some("localisations per FOV".to_string());

    if let Some(path) = &outputs.boxplot {
        visualization::plot_grouped_boxplot(path, &counts, &opts)
            .with_context(|| format!("Failed to plot box plot: {}", path.display()))?;
        info!("Wrote box plot to {}", path.display());
    }
    if let Some(path) = &outputs.scatter {
        visualization::plot_grouped_scatter(path, &counts, &opts)
            .with_context(|| format!("Failed to plot scatter: {}", path.display()))?;
        info!("Wrote scatter plot to {}", path.display());
    }

    if let (Some(path), Some(column)) = (&outputs.overlay, &outputs.overlay_column) {
        let mut series = Vec::new();
        for condition in &aggregation.tables {
            for table in &condition.tables {
                match table.column(column) {
                    Ok(values) => series.push((
                        format!("{}/{}", condition.label, table.name()),
                        values.to_vec(),
                    )),
                    Err(e) => warn!("{}: {}", table.name(), e),
                }
            }
        }
        opts.value_label = Some(column.clone());
        visualization::plot_histogram_overlay(path, &series, &opts)
            .with_context(|| format!("Failed to plot overlay: {}", path.display()))?;
        info!("Wrote histogram overlay to {}", path.display());
    }

    Ok(())
}
