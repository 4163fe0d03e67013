//! Reader for the textual reports of the gtest based benchmark binaries.
//!
//! A report is a free mix of runner lines (`[ RUN      ]`, `[       OK ]`, ...) and evaluation
//! blocks fenced by dashed lines:
//!
//! ```text
//! ----------------------------------------
//! Test: Randomized Mixed Operations Test (SegLRUCache)
//! Hit Ratio: 48.31%
//! Actual Run Time: 2.01 seconds
//! Throughput: 4.97e+06 ops/sec
//! ----------------------------------------
//! ```
//!
//! Extraction works in two tiers:
//! 1. every block is read on its own; it is named by its `Test: ` line, or, if it carries
//!    metrics, by the most recent `[ RUN      ]` line,
//! 2. only if no block produced a record, the whole output is scanned once for the metrics and
//!    a runner line naming a single test case.
//!
//! The second tier assumes the output belongs to one test case. A binary printing several
//! unnamed blocks gets all of them attributed to the first test case the runner reports.

use super::MetricRecord;
use crate::database::{excerpt, Metric, MetricSet};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

pub const BLOCK_DELIMITER: &str = "----------------------------------------";
pub const NAME_MARKER: &str = "Test: ";
pub const FAILURE_MARKER: &str = "[  FAILED  ]";

static BEGIN_TEST: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[ RUN      \] ([\w\.]+)").unwrap());
static END_TEST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\s*(?:OK|FAILED)\s*\] ([\w\.]+)").unwrap());

static THROUGHPUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Throughput(?: \(Planned Ops\))?: ([\d\.]+(?:[eE][+-]?\d+)?)\s*ops/sec").unwrap()
});
static HIT_RATIO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Hit Ratio(?: \(Finds\))?: ([\d\.]+)\s*%").unwrap());
static ELAPSED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Actual Run Time: ([\d\.]+)\s*seconds").unwrap());

fn matcher(metric: Metric) -> &'static Regex {
    match metric {
        Metric::Throughput => &THROUGHPUT,
        Metric::HitRatio => &HIT_RATIO,
        Metric::Elapsed => &ELAPSED,
    }
}

/// Result of looking for every metric pattern in a piece of text
#[derive(Debug, Default)]
struct Scan {
    metrics: MetricSet,
    errors: Vec<String>,
}

impl Scan {
    fn of(text: &str) -> Self {
        let mut scan = Self::default();

        for metric in Metric::ALL {
            let Some(raw) = matcher(metric).captures(text).and_then(|captures| captures.get(1))
            else {
                continue;
            };

            match raw.as_str().parse::<f64>() {
                Ok(value) => scan.metrics.set(metric, value),
                Err(error) => scan.errors.push(format!(
                    "{} value '{}' is not a number: {error}",
                    metric.label(),
                    raw.as_str()
                )),
            }
        }

        scan
    }

    /// true if at least one metric line was present, convertible or not
    fn found(&self) -> bool {
        !self.metrics.is_empty() || !self.errors.is_empty()
    }

    fn into_record(self, test_case: &str) -> MetricRecord {
        MetricRecord {
            test_case: test_case.to_owned(),
            metrics: self.metrics,
            error: (!self.errors.is_empty()).then(|| self.errors.join("; ")),
        }
    }
}

/// Split `output` on delimiter lines, dropping blocks that hold nothing but whitespace
pub fn split_blocks(output: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in output.split_inclusive('\n') {
        if line.trim() == BLOCK_DELIMITER {
            blocks.push(&output[start..offset]);
            start = offset + line.len();
        }

        offset += line.len();
    }
    blocks.push(&output[start..]);

    blocks
        .into_iter()
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .collect()
}

fn custom_name(block: &str) -> Option<&str> {
    block
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix(NAME_MARKER))
        .map(str::trim)
        .find(|name| !name.is_empty())
}

fn last_begin_name(text: &str) -> Option<&str> {
    BEGIN_TEST
        .captures_iter(text)
        .last()
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str())
}

#[derive(Debug, Clone, Default)]
pub struct GTestIngestor;

impl GTestIngestor {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, output: &str) -> Vec<MetricRecord> {
        let records = Self::parse_blocks(output);

        if !records.is_empty() {
            debug!("Extracted {} test cases from blocks", records.len());

            return records;
        }

        match Self::parse_whole(output) {
            Some(record) => {
                debug!(test_case = %record.test_case, "Extracted test case from whole output");

                vec![record]
            }
            None => {
                warn!(
                    output = %excerpt(output),
                    "Unable to extract any test case from output"
                );

                Vec::new()
            }
        }
    }

    /// first tier, one record per named block
    pub fn parse_blocks(output: &str) -> Vec<MetricRecord> {
        let mut records = Vec::new();
        let mut begin_name = None;

        for block in split_blocks(output) {
            if let Some(name) = last_begin_name(block) {
                begin_name = Some(name);
            }

            let scan = Scan::of(block);
            let name = match custom_name(block) {
                Some(name) => name,
                None if scan.found() => match begin_name {
                    Some(name) => name,
                    None => continue,
                },
                None => continue,
            };

            records.push(scan.into_record(name));
        }

        records
    }

    /// second tier, at most one record for the whole output
    pub fn parse_whole(output: &str) -> Option<MetricRecord> {
        let name = END_TEST
            .captures(output)
            .or_else(|| BEGIN_TEST.captures(output))
            .and_then(|captures| captures.get(1))?
            .as_str();

        Some(Scan::of(output).into_record(name))
    }
}
