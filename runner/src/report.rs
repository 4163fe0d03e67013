//! Durable artifacts of a sweep: the full run log as CSV, a grid table of the aggregates and,
//! if configured, chart data as JSON.
//!
//! Every artifact is written independently. A failure is logged and the remaining artifacts
//! are still written; nothing here changes the in-memory results.

pub mod chart;
pub mod rows;
pub mod table;

use crate::{
    aggregate::Aggregates, config::SweepConfig, database::RunRecord, matrix::ConfigurationMatrix,
};
use std::{fs, io, path::PathBuf};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to create {path:?}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write report: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to write CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to serialize chart data: {0}")]
    Json(#[from] serde_json::Error),
}

/// Write all configured artifacts, returning the number that could not be written
pub fn emit_all(
    config: &SweepConfig,
    matrix: &ConfigurationMatrix,
    records: &[RunRecord],
    aggregates: &Aggregates,
) -> usize {
    let output = &config.output;
    let mut failed = 0;

    if let Err(e) = fs::create_dir_all(&output.directory) {
        error!(
            "Failed to create output directory {}: {e}",
            output.directory.to_string_lossy()
        );
    }

    if let Err(e) = rows::write_csv(&output.csv_path(), records) {
        error!("Failed to write run log: {e}");
        failed += 1;
    }

    if let Err(e) = table::write_table(&output.table_path(), aggregates) {
        error!("Failed to write performance summary: {e}");
        failed += 1;
    }

    if let Some(chart_config) = output.chart.as_ref() {
        match chart::build_chart(chart_config, matrix, &config.targets, aggregates) {
            Some(chart) => {
                let path = output.directory.join(&chart_config.file);

                if let Err(e) = chart::write_chart(&path, &chart) {
                    error!("Failed to write chart data: {e}");
                    failed += 1;
                }
            }
            None => {
                warn!("No chart data was produced");
                failed += 1;
            }
        }
    }

    failed
}
