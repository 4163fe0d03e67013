pub mod delayed;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use delayed::RunLog;

/// Upper bound (in characters) for any process output kept on a record
pub const EXCERPT_LIMIT: usize = 1000;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    SQLite(#[from] rusqlite::Error),
    #[error("Connection was used before being initialised")]
    Uninitialised,
}

/// Outcome of a single observation, exactly one per `RunRecord`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i8)]
pub enum OutcomeStatus {
    Passed = 0,
    TestFailed = 1,
    ParseError = 2,
    BinaryNotFound = 3,
    BuildError = 4,
    ConfigError = 5,
}

impl OutcomeStatus {
    pub const ALL: [OutcomeStatus; 6] = [
        Self::ConfigError,
        Self::BuildError,
        Self::BinaryNotFound,
        Self::ParseError,
        Self::TestFailed,
        Self::Passed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigError => "CONFIG_ERROR",
            Self::BuildError => "BUILD_ERROR",
            Self::BinaryNotFound => "BINARY_NOT_FOUND",
            Self::ParseError => "PARSE_ERROR",
            Self::TestFailed => "TEST_FAILED",
            Self::Passed => "PASSED",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Throughput,
    HitRatio,
    Elapsed,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Self::Throughput, Self::HitRatio, Self::Elapsed];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Throughput => "Throughput (ops/sec)",
            Self::HitRatio => "Hit Ratio (%)",
            Self::Elapsed => "Actual Run Time (s)",
        }
    }
}

/// Metrics surfaced by one test case, every field is independently optional
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MetricSet {
    #[serde(default)]
    pub throughput: Option<f64>,
    #[serde(default)]
    pub hit_ratio: Option<f64>,
    #[serde(default)]
    pub elapsed: Option<f64>,
}

impl MetricSet {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Throughput => self.throughput,
            Metric::HitRatio => self.hit_ratio,
            Metric::Elapsed => self.elapsed,
        }
    }

    pub fn set(&mut self, metric: Metric, value: f64) {
        match metric {
            Metric::Throughput => self.throughput = Some(value),
            Metric::HitRatio => self.hit_ratio = Some(value),
            Metric::Elapsed => self.elapsed = Some(value),
        }
    }

    pub fn is_empty(&self) -> bool {
        Metric::ALL.iter().all(|metric| self.get(*metric).is_none())
    }
}

/// A single observation of the sweep. Records are never changed after being appended to the
/// `RunLog`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub configuration: String,
    pub segment_bits: u32,
    pub binary: String,
    pub test_case: String,
    // 1-based, 0 for records that do not belong to a run (build failures, missing binaries)
    pub run: u32,
    pub status: OutcomeStatus,
    pub metrics: Option<MetricSet>,
    pub failure: Option<String>,
}

pub const NOT_APPLICABLE: &str = "N/A";

impl RunRecord {
    /// segment count derived from the bit-width
    pub fn segments(&self) -> u64 {
        1u64 << self.segment_bits
    }

    pub fn is_passed(&self) -> bool {
        self.status == OutcomeStatus::Passed
    }

    /// build level failure, recorded once per configuration
    pub fn build_failure(
        configuration: &str,
        segment_bits: u32,
        status: OutcomeStatus,
        output: &str,
    ) -> Self {
        let binary = match status {
            OutcomeStatus::ConfigError => "N/A (Configure Failed)",
            _ => "N/A (Build Failed)",
        };

        Self {
            configuration: configuration.to_owned(),
            segment_bits,
            binary: binary.to_owned(),
            test_case: NOT_APPLICABLE.to_owned(),
            run: 0,
            status,
            metrics: None,
            failure: Some(excerpt(output)),
        }
    }

    pub fn binary_not_found(configuration: &str, segment_bits: u32, binary: &str) -> Self {
        Self {
            configuration: configuration.to_owned(),
            segment_bits,
            binary: binary.to_owned(),
            test_case: NOT_APPLICABLE.to_owned(),
            run: 0,
            status: OutcomeStatus::BinaryNotFound,
            metrics: None,
            failure: Some(format!("{binary} not found")),
        }
    }
}

/// Cut `output` down to `EXCERPT_LIMIT` characters, marking the cut with `...`
pub fn excerpt(output: &str) -> String {
    match output.char_indices().nth(EXCERPT_LIMIT) {
        Some((index, _)) => format!("{}...", &output[..index]),
        None => output.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_is_bounded_on_char_boundaries() {
        let short = "short output";
        assert_eq!(excerpt(short), short);

        let long = "é".repeat(EXCERPT_LIMIT + 10);
        let cut = excerpt(&long);

        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), EXCERPT_LIMIT + 3);
    }

    #[test]
    fn metric_set_accessors() {
        let mut metrics = MetricSet::default();
        assert!(metrics.is_empty());

        metrics.set(Metric::HitRatio, 45.5);
        assert_eq!(metrics.get(Metric::HitRatio), Some(45.5));
        assert_eq!(metrics.get(Metric::Throughput), None);
        assert!(!metrics.is_empty());
    }

    #[test]
    fn build_failures_carry_status_specific_binary_label() {
        let record = RunRecord::build_failure("A", 4, OutcomeStatus::ConfigError, "boom");

        assert_eq!(record.binary, "N/A (Configure Failed)");
        assert_eq!(record.run, 0);
        assert_eq!(record.segments(), 16);
        assert_eq!(record.failure.as_deref(), Some("boom"));
        assert_eq!(record.status.to_string(), "CONFIG_ERROR");
    }
}
