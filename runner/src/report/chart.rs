use super::ReportError;
use crate::{
    aggregate::{Aggregates, Category},
    config::{ChartConfig, TargetBinary},
    database::Metric,
    matrix::ConfigurationMatrix,
};
use serde::Serialize;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};
use tracing::{info, warn};

/// Data behind a line chart of one metric over the segment counts of a single variant
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChartData {
    pub variant: String,
    pub metric: Metric,
    pub x_label: &'static str,
    pub y_label: &'static str,
    pub series: Vec<Series>,
}

/// one line per binary
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Series {
    pub binary: String,
    pub points: Vec<Point>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub segment_bits: u32,
    pub segments: u64,
    // mean of the sharded cache aggregate, null if no PASSED record carried the metric
    pub value: Option<f64>,
}

/// Collect one series per target from the sharded cache aggregates of the selected variant.
/// Returns None if the variant is unknown.
pub fn build_chart(
    config: &ChartConfig,
    matrix: &ConfigurationMatrix,
    targets: &[TargetBinary],
    aggregates: &Aggregates,
) -> Option<ChartData> {
    let variant = match config.variant.as_ref() {
        Some(variant) => variant.clone(),
        None => matrix.iter().next()?.variant.clone(),
    };

    let configurations = matrix
        .iter()
        .filter(|configuration| configuration.variant == variant)
        .collect::<Vec<_>>();

    if configurations.is_empty() {
        warn!("Variant {variant} is not part of the sweep, no chart data available");

        return None;
    }

    let series = targets
        .iter()
        .map(|target| {
            let category = Category::sharded(target.role);

            Series {
                binary: target.name.clone(),
                points: configurations
                    .iter()
                    .map(|configuration| Point {
                        segment_bits: configuration.segment_bits,
                        segments: configuration.segments(),
                        value: aggregates
                            .get(&(category, configuration.name.clone()))
                            .and_then(|result| result.get(config.metric))
                            .map(|summary| summary.mean),
                    })
                    .collect(),
            }
        })
        .collect();

    Some(ChartData {
        variant,
        metric: config.metric,
        x_label: "Segment count",
        y_label: config.metric.label(),
        series,
    })
}

pub fn write_chart(path: &Path, chart: &ChartData) -> Result<(), ReportError> {
    let file = File::create(path).map_err(|source| ReportError::Create {
        path: path.to_path_buf(),
        source,
    })?;

    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, chart)?;
    writer.flush()?;
    info!(
        "Wrote {} chart data for {} to {}",
        chart.metric.label(),
        chart.variant,
        path.to_string_lossy()
    );

    Ok(())
}
