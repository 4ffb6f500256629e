use std::fs;
use std::path::Path;

use smlm_pipeline::core::loaders::{load_fov_csv, SchemaMode};
use smlm_pipeline::core::writers::{write_fov_to_dir, write_summary_csv};
use smlm_pipeline::processors::{
    add_derived_metrics, aggregate_conditions, apply_thresholds, counts_by_condition,
    AggregateOptions, Condition, FailurePolicy, Threshold,
};
use smlm_pipeline::visualization::{plot_grouped_boxplot, plot_histogram, PlotOptions};
use tempfile::TempDir;

/// Raw export row with every field `1` except the variances and PSF sigmas.
fn raw_row(var_x: f64, var_y: f64, sigma_x: f64, sigma_y: f64) -> String {
    let mut fields = vec!["1".to_string(); 22];
    fields[5] = var_x.to_string();
    fields[6] = var_y.to_string();
    fields[13] = sigma_x.to_string();
    fields[14] = sigma_y.to_string();
    fields.join(",")
}

fn write_raw(path: &Path, rows: &[String]) {
    let mut content = String::from("# exported localisations\n");
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    fs::write(path, content).unwrap();
}

#[test]
fn raw_file_gets_precision_and_psf_columns() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("fov1.csv");
    let row = raw_row(4.0, 9.0, 100.0, 120.0);
    write_raw(&path, &[row.clone(), row.clone(), row]);

    let mut table = load_fov_csv(&path, SchemaMode::Raw, None).unwrap();
    assert_eq!(table.name(), "fov1");
    assert_eq!(table.num_rows(), 3);
    assert_eq!(table.num_columns(), 22);

    add_derived_metrics(&mut table).unwrap();
    assert_eq!(table.num_columns(), 25);
    assert_eq!(table.column("locprec-mean-nm").unwrap(), &[2.5, 2.5, 2.5]);
    assert_eq!(table.column("locprec-max-nm").unwrap(), &[3.0, 3.0, 3.0]);
    assert_eq!(table.column("psf-sigma-mean-nm").unwrap(), &[110.0, 110.0, 110.0]);
}

#[test]
fn filtered_table_reloads_as_preprocessed() {
    let temp = TempDir::new().unwrap();
    let raw_path = temp.path().join("fov7.csv");
    let rows: Vec<String> = [1.0, 16.0, 100.0, 400.0]
        .iter()
        .map(|&var| raw_row(var, var, 90.0, 110.0))
        .collect();
    write_raw(&raw_path, &rows);

    let mut table = load_fov_csv(&raw_path, SchemaMode::Raw, None).unwrap();
    add_derived_metrics(&mut table).unwrap();
    let filtered =
        apply_thresholds(&table, &[Threshold::new("locprec-mean-nm", 15.0)]).unwrap();
    assert_eq!(filtered.column("locprec-mean-nm").unwrap(), &[1.0, 4.0, 10.0]);

    let out_dir = temp.path().join("filtered");
    let written = write_fov_to_dir(&out_dir, &filtered).unwrap();
    assert_eq!(written, out_dir.join("fov7.csv"));

    let reloaded = load_fov_csv(&written, SchemaMode::Preprocessed, None).unwrap();
    assert_eq!(reloaded.name(), "fov7");
    assert_eq!(reloaded.columns(), filtered.columns());
    for (name, values) in filtered.iter_columns() {
        assert_eq!(reloaded.column(name).unwrap(), values, "column {}", name);
    }
}

#[test]
fn aggregation_counts_fovs_per_condition() {
    let temp = TempDir::new().unwrap();
    let blank = temp.path().join("blank");
    let treated = temp.path().join("treated");
    fs::create_dir_all(&blank).unwrap();
    fs::create_dir_all(&treated).unwrap();

    for (i, n) in [3usize, 5, 2, 4, 1].iter().enumerate() {
        let rows: Vec<String> = (0..*n).map(|_| raw_row(4.0, 4.0, 100.0, 100.0)).collect();
        write_raw(&blank.join(format!("fov{}.csv", i + 1)), &rows);
    }

    let conditions = vec![Condition::from_dir(&blank), Condition::from_dir(&treated)];
    let aggregation = aggregate_conditions(&conditions, &AggregateOptions::default()).unwrap();

    assert_eq!(aggregation.summary.len(), 5);
    assert!(aggregation.summary.iter().all(|s| s.condition == "blank"));
    assert_eq!(aggregation.total_localisations(), 15);

    let counts = counts_by_condition(&aggregation.summary);
    assert_eq!(counts, vec![("blank".to_string(), vec![3.0, 5.0, 2.0, 4.0, 1.0])]);

    let summary_path = temp.path().join("out").join("summary.csv");
    write_summary_csv(&summary_path, &aggregation.summary).unwrap();
    let summary = fs::read_to_string(&summary_path).unwrap();
    let lines: Vec<&str> = summary.lines().collect();
    assert_eq!(lines[0], "condition,fov,localisations");
    assert_eq!(lines[1], "blank,fov1,3");
    assert_eq!(lines.len(), 6);

    let opts = PlotOptions {
        width: 400,
        height: 300,
        ..PlotOptions::default()
    };
    let chart = temp.path().join("out").join("counts.svg");
    plot_grouped_boxplot(&chart, &counts, &opts).unwrap();
    assert!(chart.exists());
}

#[test]
fn skip_policy_continues_past_malformed_file() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("cond");
    fs::create_dir_all(&dir).unwrap();
    write_raw(&dir.join("fov1.csv"), &[raw_row(1.0, 1.0, 1.0, 1.0)]);
    write_raw(&dir.join("fov2.csv"), &["1,2,3".to_string()]);

    let conditions = vec![Condition::new("c", &dir)];
    let abort = aggregate_conditions(&conditions, &AggregateOptions::default());
    assert!(abort.is_err());

    let options = AggregateOptions {
        failure_policy: FailurePolicy::Skip,
        ..AggregateOptions::default()
    };
    let aggregation = aggregate_conditions(&conditions, &options).unwrap();
    assert_eq!(aggregation.summary.len(), 1);
    assert_eq!(aggregation.skipped.len(), 1);
    assert!(aggregation.skipped[0].path.ends_with("fov2.csv"));
}

#[test]
fn derived_column_histogram_renders() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("fov1.csv");
    let rows: Vec<String> = (1..=50)
        .map(|i| raw_row(i as f64, i as f64, 100.0, 100.0))
        .collect();
    write_raw(&path, &rows);

    let mut table = load_fov_csv(&path, SchemaMode::Raw, None).unwrap();
    add_derived_metrics(&mut table).unwrap();

    let image = temp.path().join("locprec.png");
    let opts = PlotOptions {
        bins: 10,
        width: 320,
        height: 240,
        ..PlotOptions::default()
    };
    plot_histogram(&image, table.column("locprec-mean-nm").unwrap(), &opts).unwrap();
    assert!(fs::metadata(&image).unwrap().len() > 0);
}
