//! Visualization tools for localisation tables and cross-FOV summaries.
//!
//! Charts are rendered with plotters. The output format follows the file
//! extension: `.svg` gives a vector image, anything else a bitmap.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use plotters::coord::Shift;
use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use plotters_svg::SVGBackend;
use thiserror::Error;

use crate::config::PlotConfig;
use crate::core::table::{FovTable, Result as TableResult};

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("No finite values to plot")]
    EmptyData,

    #[error("Invalid plot range: {0}")]
    InvalidRange(String),
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// Bar and line colour for single-series charts (xkcd "sea green").
const SEA_GREEN: RGBColor = RGBColor(83, 252, 161);

const MARGIN: u32 = 10;

/// Binning and image options shared by all charts.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotOptions {
    /// Histogram bucket count
    pub bins: usize,
    /// Clamp `(low, high)`; values outside are left out
    pub range: Option<(f64, f64)>,
    pub width: u32,
    pub height: u32,
    pub title: Option<String>,
    /// Axis label for the plotted values
    pub value_label: Option<String>,
}

impl PlotOptions {
    pub fn from_config(config: &PlotConfig) -> Self {
        Self {
            bins: config.bins,
            range: None,
            width: config.width,
            height: config.height,
            title: None,
            value_label: None,
        }
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self::from_config(&PlotConfig::default())
    }
}

/// Equal-width histogram counts.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub low: f64,
    pub high: f64,
    pub counts: Vec<usize>,
}

impl Histogram {
    #[inline]
    pub fn bin_width(&self) -> f64 {
        (self.high - self.low) / self.counts.len() as f64
    }

    /// Bin edges, `counts.len() + 1` values from `low` to `high`.
    pub fn edges(&self) -> Vec<f64> {
        let width = self.bin_width();
        (0..=self.counts.len())
            .map(|i| self.low + i as f64 * width)
            .collect()
    }

    pub fn centers(&self) -> Vec<f64> {
        let width = self.bin_width();
        (0..self.counts.len())
            .map(|i| self.low + (i as f64 + 0.5) * width)
            .collect()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn max_count(&self) -> usize {
        self.counts.iter().copied().max().unwrap_or(0)
    }
}

/// Returns the finite min/max of `values`, if any.
fn finite_bounds<'a, I: IntoIterator<Item = &'a f64>>(values: I) -> Option<(f64, f64)> {
    values
        .into_iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Resolve the binning range from an explicit clamp or the data.
fn resolve_range(range: Option<(f64, f64)>, data_bounds: Option<(f64, f64)>) -> Result<(f64, f64)> {
    match range {
        Some((lo, hi)) => {
            if !lo.is_finite() || !hi.is_finite() || lo >= hi {
                return Err(VisualizationError::InvalidRange(format!("{}..{}", lo, hi)));
            }
            Ok((lo, hi))
        }
        None => {
            let (lo, hi) = data_bounds.ok_or(VisualizationError::EmptyData)?;
            // A single distinct value still gets a visible bin.
            if lo == hi {
                Ok((lo - 0.5, hi + 0.5))
            } else {
                Ok((lo, hi))
            }
        }
    }
}

/// Count `values` into `bins` equal-width buckets.
///
/// The range is `range` if given, otherwise the finite min/max of the data.
/// Values outside the range and `NaN`s are ignored; the last bucket includes
/// its upper edge.
pub fn compute_histogram(values: &[f64], bins: usize, range: Option<(f64, f64)>) -> Result<Histogram> {
    if bins == 0 {
        return Err(VisualizationError::InvalidRange("bins must be at least 1".to_string()));
    }
    let (low, high) = resolve_range(range, finite_bounds(values))?;
    Ok(bin_values(values, bins, low, high))
}

fn bin_values(values: &[f64], bins: usize, low: f64, high: f64) -> Histogram {
    let width = (high - low) / bins as f64;
    let mut counts = vec![0usize; bins];

    for &v in values {
        if !(v >= low && v <= high) {
            continue;
        }
        let idx = (((v - low) / width).floor() as usize).min(bins - 1);
        counts[idx] += 1;
    }

    Histogram { low, high, counts }
}

/// Group the values of `value_column` by the distinct values of `group_column`.
///
/// Groups are ordered by ascending group value; rows with a `NaN` group key
/// are left out.
pub fn group_column_by(
    table: &FovTable,
    value_column: &str,
    group_column: &str,
) -> TableResult<Vec<(String, Vec<f64>)>> {
    let values = table.column(value_column)?;
    let keys = table.column(group_column)?;

    // f64 is not Ord; the bit pattern of a non-NaN key is a stable map key.
    let mut groups: BTreeMap<i64, (f64, Vec<f64>)> = BTreeMap::new();
    for (&key, &value) in keys.iter().zip(values) {
        if key.is_nan() {
            continue;
        }
        // -0.0 and 0.0 are one group.
        let key = if key == 0.0 { 0.0 } else { key };
        groups
            .entry(ordered_key(key))
            .or_insert_with(|| (key, Vec::new()))
            .1
            .push(value);
    }

    Ok(groups
        .into_values()
        .map(|(key, values)| (format!("{}", key), values))
        .collect())
}

/// Maps an f64 to an i64 with the same ordering.
fn ordered_key(v: f64) -> i64 {
    let bits = v.to_bits() as i64;
    if bits < 0 {
        bits ^ i64::MAX
    } else {
        bits
    }
}

enum ImageFormat {
    Bitmap,
    Svg,
}

fn image_format(path: &Path) -> ImageFormat {
    match path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("svg") => ImageFormat::Svg,
        _ => ImageFormat::Bitmap,
    }
}

fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn plot_err<E: std::fmt::Display>(e: E) -> VisualizationError {
    VisualizationError::PlottingError(e.to_string())
}

/// Render onto whichever backend the output extension selects.
macro_rules! render {
    ($path:expr, $opts:expr, $draw:ident ( $($arg:expr),* )) => {{
        ensure_parent_dirs($path)?;
        match image_format($path) {
            ImageFormat::Svg => {
                let root = SVGBackend::new($path, $opts.size()).into_drawing_area();
                $draw(&root, $($arg),*)
            }
            ImageFormat::Bitmap => {
                let root = BitMapBackend::new($path, $opts.size()).into_drawing_area();
                $draw(&root, $($arg),*)
            }
        }
    }};
}

/// Plot a histogram of one column and save it to `output_path`.
///
/// # Arguments
///
/// * `output_path` - PNG or SVG file to write
/// * `values` - Column values; `NaN`s are ignored
/// * `opts` - Bin count, optional range clamp and image size
pub fn plot_histogram(output_path: &Path, values: &[f64], opts: &PlotOptions) -> Result<()> {
    let hist = compute_histogram(values, opts.bins, opts.range)?;
    render!(output_path, opts, draw_histogram(&hist, opts))
}

fn draw_histogram<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    hist: &Histogram,
    opts: &PlotOptions,
) -> Result<()> {
    root.fill(&WHITE).map_err(plot_err)?;

    let y_max = (hist.max_count().max(1) as f64) * 1.05;
    let mut builder = ChartBuilder::on(root);
    builder.margin(MARGIN).x_label_area_size(40).y_label_area_size(60);
    if let Some(title) = &opts.title {
        builder.caption(title, ("sans-serif", 20));
    }
    let mut chart = builder
        .build_cartesian_2d(hist.low..hist.high, 0.0..y_max)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_desc(opts.value_label.as_deref().unwrap_or("value"))
        .y_desc("count")
        .draw()
        .map_err(plot_err)?;

    let edges = hist.edges();
    chart
        .draw_series(hist.counts.iter().enumerate().map(|(i, &count)| {
            Rectangle::new([(edges[i], 0.0), (edges[i + 1], count as f64)], SEA_GREEN.filled())
        }))
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

/// Plot per-FOV histograms as overlaid lines over a shared range.
///
/// # Arguments
///
/// * `output_path` - PNG or SVG file to write
/// * `series` - `(fov name, values)` pairs
/// * `opts` - Bin count, optional range clamp and image size
pub fn plot_histogram_overlay(
    output_path: &Path,
    series: &[(String, Vec<f64>)],
    opts: &PlotOptions,
) -> Result<()> {
    if opts.bins == 0 {
        return Err(VisualizationError::InvalidRange("bins must be at least 1".to_string()));
    }
    let bounds = finite_bounds(series.iter().flat_map(|(_, values)| values.iter()));
    let (low, high) = resolve_range(opts.range, bounds)?;

    let hists: Vec<(&str, Histogram)> = series
        .iter()
        .map(|(name, values)| (name.as_str(), bin_values(values, opts.bins, low, high)))
        .collect();

    render!(output_path, opts, draw_histogram_overlay(&hists, opts))
}

fn draw_histogram_overlay<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    hists: &[(&str, Histogram)],
    opts: &PlotOptions,
) -> Result<()> {
    let (low, high) = hists
        .first()
        .map(|(_, h)| (h.low, h.high))
        .ok_or(VisualizationError::EmptyData)?;
    let y_max = hists
        .iter()
        .map(|(_, h)| h.max_count())
        .max()
        .unwrap_or(0)
        .max(1) as f64
        * 1.05;

    root.fill(&WHITE).map_err(plot_err)?;

    let mut builder = ChartBuilder::on(root);
    builder.margin(MARGIN).x_label_area_size(40).y_label_area_size(60);
    if let Some(title) = &opts.title {
        builder.caption(title, ("sans-serif", 20));
    }
    let mut chart = builder
        .build_cartesian_2d(low..high, 0.0..y_max)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc(opts.value_label.as_deref().unwrap_or("value"))
        .y_desc("count")
        .draw()
        .map_err(plot_err)?;

    for (i, (name, hist)) in hists.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        let points: Vec<(f64, f64)> = hist
            .centers()
            .into_iter()
            .zip(hist.counts.iter().map(|&c| c as f64))
            .collect();
        chart
            .draw_series(LineSeries::new(points, &color))
            .map_err(plot_err)?
            .label(*name)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

/// Drop `NaN`s and empty groups; plotters' quartiles cannot order `NaN`.
fn clean_groups(groups: &[(String, Vec<f64>)]) -> Result<Vec<(String, Vec<f64>)>> {
    let cleaned: Vec<(String, Vec<f64>)> = groups
        .iter()
        .map(|(label, values)| {
            let values: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
            (label.clone(), values)
        })
        .filter(|(_, values)| !values.is_empty())
        .collect();

    if cleaned.is_empty() {
        return Err(VisualizationError::EmptyData);
    }
    Ok(cleaned)
}

/// Padded value range across all groups, or the explicit clamp.
fn group_value_range(groups: &[(String, Vec<f64>)], range: Option<(f64, f64)>) -> Result<(f64, f64)> {
    if range.is_some() {
        return resolve_range(range, None);
    }
    let (lo, hi) = resolve_range(None, finite_bounds(groups.iter().flat_map(|(_, v)| v.iter())))?;
    let pad = (hi - lo) * 0.05;
    Ok((lo - pad, hi + pad))
}

fn segment_label(value: &SegmentValue<&String>) -> String {
    match value {
        SegmentValue::CenterOf(label) | SegmentValue::Exact(label) => label.to_string(),
        SegmentValue::Last => String::new(),
    }
}

/// Box plot of values per group, e.g. localisation counts per condition.
pub fn plot_grouped_boxplot(
    output_path: &Path,
    groups: &[(String, Vec<f64>)],
    opts: &PlotOptions,
) -> Result<()> {
    let groups = clean_groups(groups)?;
    let range = group_value_range(&groups, opts.range)?;
    render!(output_path, opts, draw_grouped_boxplot(&groups, range, opts))
}

fn draw_grouped_boxplot<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    groups: &[(String, Vec<f64>)],
    (low, high): (f64, f64),
    opts: &PlotOptions,
) -> Result<()> {
    let labels: Vec<String> = groups.iter().map(|(label, _)| label.clone()).collect();

    root.fill(&WHITE).map_err(plot_err)?;

    let mut builder = ChartBuilder::on(root);
    builder.margin(MARGIN).x_label_area_size(40).y_label_area_size(60);
    if let Some(title) = &opts.title {
        builder.caption(title, ("sans-serif", 20));
    }
    let mut chart = builder
        .build_cartesian_2d(labels[..].into_segmented(), low as f32..high as f32)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_label_formatter(&segment_label)
        .y_desc(opts.value_label.as_deref().unwrap_or("value"))
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(labels.iter().zip(groups).map(|(label, (_, values))| {
            Boxplot::new_vertical(SegmentValue::CenterOf(label), &Quartiles::new(values.as_slice()))
                .style(SEA_GREEN.stroke_width(2))
        }))
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

/// Scatter of group vs. value, e.g. condition vs. localisation count.
pub fn plot_grouped_scatter(
    output_path: &Path,
    groups: &[(String, Vec<f64>)],
    opts: &PlotOptions,
) -> Result<()> {
    let groups = clean_groups(groups)?;
    let range = group_value_range(&groups, opts.range)?;
    render!(output_path, opts, draw_grouped_scatter(&groups, range, opts))
}

fn draw_grouped_scatter<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    groups: &[(String, Vec<f64>)],
    (low, high): (f64, f64),
    opts: &PlotOptions,
) -> Result<()> {
    let labels: Vec<String> = groups.iter().map(|(label, _)| label.clone()).collect();

    root.fill(&WHITE).map_err(plot_err)?;

    let mut builder = ChartBuilder::on(root);
    builder.margin(MARGIN).x_label_area_size(40).y_label_area_size(60);
    if let Some(title) = &opts.title {
        builder.caption(title, ("sans-serif", 20));
    }
    let mut chart = builder
        .build_cartesian_2d(labels[..].into_segmented(), low..high)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_label_formatter(&segment_label)
        .y_desc(opts.value_label.as_deref().unwrap_or("value"))
        .draw()
        .map_err(plot_err)?;

    for (i, (label, (_, values))) in labels.iter().zip(groups).enumerate() {
        let color = Palette99::pick(i).to_rgba();
        chart
            .draw_series(
                values
                    .iter()
                    .filter(|&&v| v >= low && v <= high)
                    .map(|&v| Circle::new((SegmentValue::CenterOf(label), v), 4, color.filled())),
            )
            .map_err(plot_err)?;
    }

    root.present().map_err(plot_err)?;
    Ok(())
}
